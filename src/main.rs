use mtf_migrate::db;
use mtf_migrate::migrate::{run_migration, RunOptions, Scope};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

const BANNER: &str = "================================================================================";

/// Key=value invocation parameters, mirroring the administrative surface
/// this tool replaces: workspace=<dir> userid=<id> and exactly one of
/// courseid=<n>, categoryid=<n>, all=1, plus dryrun=<0|1> (default 1).
#[derive(Debug, Default)]
struct Params {
    workspace: Option<PathBuf>,
    user_id: Option<i64>,
    course_id: i64,
    category_id: i64,
    all: i64,
    dry_run: i64,
    json: i64,
}

impl Params {
    fn parse<I: Iterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut params = Params {
            dry_run: 1,
            ..Params::default()
        };
        for arg in args {
            let Some((key, value)) = arg.split_once('=') else {
                return Err(format!("expected key=value, got \"{}\"", arg));
            };
            match key {
                "workspace" => params.workspace = Some(PathBuf::from(value)),
                "userid" => params.user_id = Some(parse_nonnegative(key, value)?),
                "courseid" => params.course_id = parse_nonnegative(key, value)?,
                "categoryid" => params.category_id = parse_nonnegative(key, value)?,
                "all" => params.all = parse_nonnegative(key, value)?,
                "dryrun" => params.dry_run = parse_nonnegative(key, value)?,
                "json" => params.json = parse_nonnegative(key, value)?,
                other => return Err(format!("unknown parameter \"{}\"", other)),
            }
        }
        Ok(params)
    }

    /// First satisfied wins: all, then courseid, then categoryid.
    fn scope(&self) -> Option<Scope> {
        if self.all == 1 {
            Some(Scope::All)
        } else if self.course_id > 0 {
            Some(Scope::Course(self.course_id))
        } else if self.category_id > 0 {
            Some(Scope::Category(self.category_id))
        } else {
            None
        }
    }
}

fn parse_nonnegative(key: &str, value: &str) -> Result<i64, String> {
    match value.parse::<i64>() {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(format!("parameter \"{}\" needs a non-negative integer", key)),
    }
}

fn print_usage(out: &mut dyn Write) {
    let _ = writeln!(
        out,
        "\nParameters:\n\n{BANNER}\n\
         You need to specify ONE of the following three parameters:\n\
         \n\
           courseid=<id>     migrate MTF questions within one course\n\
           categoryid=<id>   migrate MTF questions within one question category\n\
           all=1             migrate every MTF question in the instance\n\
         \n\
         IMPORTANT AND STRONGLY RECOMMENDED:\n\
         \n\
           dryrun=<0|1>      enabled by default. With dryrun enabled no changes\n\
                             are made to the database. Set dryrun=0 to commit.\n\
         \n\
         Always required:\n\
         \n\
           workspace=<dir>   question-bank workspace directory\n\
           userid=<id>       acting user; must be a site administrator\n\
         \n\
         Optional:\n\
         \n\
           json=1            additionally print the final report as JSON\n\
         \n\
         {BANNER}\n\
         \n\
         Examples:\n\
         \n\
           mtf-migrate workspace=/srv/qbank userid=2 courseid=55\n\
           mtf-migrate workspace=/srv/qbank userid=2 categoryid=1\n\
           mtf-migrate workspace=/srv/qbank userid=2 all=1\n\
           mtf-migrate workspace=/srv/qbank userid=2 all=1 dryrun=0\n"
    );
}

fn print_banner(out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{BANNER}")?;
    writeln!(out, "M I G R A T I O N :: MTF to Multichoice")?;
    writeln!(out, "{BANNER}")?;
    Ok(())
}

fn run() -> Result<ExitCode, anyhow::Error> {
    let mut stdout = io::stdout();

    let params = match Params::parse(std::env::args().skip(1)) {
        Ok(p) => p,
        Err(msg) => {
            print_banner(&mut stdout)?;
            writeln!(stdout, "\n{}", msg)?;
            print_usage(&mut stdout);
            return Ok(ExitCode::SUCCESS);
        }
    };

    let (Some(workspace), Some(user_id)) = (&params.workspace, params.user_id) else {
        print_banner(&mut stdout)?;
        print_usage(&mut stdout);
        return Ok(ExitCode::SUCCESS);
    };

    let mut conn = db::open_db(workspace)?;

    // Refusal is the only output an unauthorized caller gets.
    if !db::is_site_admin(&conn, user_id)? {
        writeln!(stdout, "You are not a site administrator!")?;
        return Ok(ExitCode::FAILURE);
    }

    print_banner(&mut stdout)?;

    let Some(scope) = params.scope() else {
        print_usage(&mut stdout);
        return Ok(ExitCode::SUCCESS);
    };

    // Anything but an explicit dryrun=0 stays a dry run.
    let dry_run = params.dry_run != 0;
    if dry_run {
        writeln!(stdout, "--------------------------------------------------------------------------------")?;
        writeln!(stdout, "Dryrun enabled: NO changes to the database will be made!")?;
        writeln!(stdout, "--------------------------------------------------------------------------------")?;
    }

    let opts = RunOptions {
        dry_run,
        actor_id: user_id,
    };
    let report = run_migration(&mut conn, scope, &opts, &mut stdout)?;

    writeln!(stdout, "\n{BANNER}")?;
    writeln!(
        stdout,
        "SCRIPT DONE: Time needed: {:.4} seconds.",
        report.elapsed_seconds
    )?;
    writeln!(stdout, "{} categories duplicated", report.num_categories_created)?;
    writeln!(
        stdout,
        "{}/{} questions migrated",
        report.num_migrated, report.questions_found
    )?;
    writeln!(stdout, "{BANNER}")?;

    if params.json == 1 {
        writeln!(stdout, "{}", serde_json::to_string(&report)?)?;
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
