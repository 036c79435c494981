use crate::fractions::{self, WeightRecord};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::time::Instant;
use uuid::Uuid;

pub const CATEGORY_NAME_SUFFIX: &str = " (MTF to MC)";
pub const MAX_QUESTION_NAME_CHARS: usize = 255;

const CORRECT_FEEDBACK: &str = "Your answer is correct";
const PARTIALLY_CORRECT_FEEDBACK: &str = "Your answer is partially correct";
const INCORRECT_FEEDBACK: &str = "Your answer is incorrect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Course(i64),
    Category(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    CourseNotFound(i64),
    NoCategoriesInCourse(i64),
    CategoryNotFound(i64),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeError::CourseNotFound(id) => write!(f, "course with id {} not found", id),
            ScopeError::NoCategoriesInCourse(id) => write!(
                f,
                "no question categories found for course {}; refusing to run without restrictions",
                id
            ),
            ScopeError::CategoryNotFound(id) => {
                write!(f, "question category with id {} not found", id)
            }
        }
    }
}

impl std::error::Error for ScopeError {}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub dry_run: bool,
    pub actor_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedQuestion {
    pub id: i64,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub questions_found: usize,
    pub num_migrated: usize,
    pub num_categories_created: usize,
    pub skipped: Vec<SkippedQuestion>,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone)]
struct SourceQuestion {
    id: i64,
    category_id: i64,
    name: String,
    questiontext: String,
    questiontext_format: i64,
    general_feedback: String,
    general_feedback_format: i64,
    default_mark: f64,
    penalty: f64,
    length: i64,
    hidden: i64,
}

#[derive(Debug, Clone)]
struct MtfRow {
    number: i64,
    option_text: String,
    option_text_format: i64,
    option_feedback: String,
    option_feedback_format: i64,
}

#[derive(Debug, Clone)]
struct MtfOptions {
    shuffle_answers: i64,
    answer_numbering: String,
}

#[derive(Debug, Clone)]
struct CategoryRecord {
    id: i64,
    context_id: i64,
    name: String,
    info: String,
    sort_order: i64,
}

/// Run-local state: memoized category duplications plus counters. Built
/// fresh for every run so category mapping never leaks between runs.
#[derive(Debug, Default)]
struct MigrationRun {
    category_map: HashMap<i64, i64>,
    num_migrated: usize,
    num_categories_created: usize,
    skipped: Vec<SkippedQuestion>,
}

fn new_stamp() -> String {
    Uuid::new_v4().to_string()
}

/// Appends the migration suffix and bounds the whole name to the
/// `questions.name` column limit.
fn destination_name(source_name: &str, now: &DateTime<Utc>) -> String {
    let full = format!("{} (MC {})", source_name, now.format("%Y-%m-%d %H:%M:%S"));
    full.chars().take(MAX_QUESTION_NAME_CHARS).collect()
}

/// Resolves the requested scope to the set of eligible category ids.
/// `None` means every category (the `all` scope). Fails before any write
/// occurs, so callers need no transaction handling on this path.
fn resolve_scope(conn: &Connection, scope: Scope) -> anyhow::Result<Option<Vec<i64>>> {
    match scope {
        Scope::All => Ok(None),
        Scope::Course(course_id) => {
            let context_id: Option<i64> = conn
                .query_row(
                    "SELECT context_id FROM courses WHERE id = ?",
                    [course_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(context_id) = context_id else {
                return Err(ScopeError::CourseNotFound(course_id).into());
            };
            let mut stmt = conn.prepare(
                "SELECT id FROM question_categories WHERE context_id = ? ORDER BY id",
            )?;
            let ids = stmt
                .query_map([context_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            if ids.is_empty() {
                return Err(ScopeError::NoCategoriesInCourse(course_id).into());
            }
            Ok(Some(ids))
        }
        Scope::Category(category_id) => {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM question_categories WHERE id = ?",
                    [category_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(ScopeError::CategoryNotFound(category_id).into());
            }
            Ok(Some(vec![category_id]))
        }
    }
}

/// Source questions in scope: MTF qtype with an options row, ordered by
/// category then id. The category ordering matters because category
/// duplication is memoized as the loop walks forward.
fn select_questions(
    conn: &Connection,
    category_ids: &Option<Vec<i64>>,
) -> anyhow::Result<Vec<SourceQuestion>> {
    let mut sql = String::from(
        "SELECT q.id, q.category_id, q.name, q.questiontext, q.questiontext_format,
                q.general_feedback, q.general_feedback_format, q.default_mark,
                q.penalty, q.length, q.hidden
         FROM questions q
         WHERE q.qtype = 'mtf'
           AND q.id IN (SELECT question_id FROM qtype_mtf_options)",
    );
    if let Some(ids) = category_ids {
        let placeholders = vec!["?"; ids.len()].join(",");
        sql.push_str(&format!(" AND q.category_id IN ({})", placeholders));
    }
    sql.push_str(" ORDER BY q.category_id ASC, q.id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let params_iter = category_ids.as_deref().unwrap_or(&[]);
    let questions = stmt
        .query_map(params_from_iter(params_iter.iter()), |row| {
            Ok(SourceQuestion {
                id: row.get(0)?,
                category_id: row.get(1)?,
                name: row.get(2)?,
                questiontext: row.get(3)?,
                questiontext_format: row.get(4)?,
                general_feedback: row.get(5)?,
                general_feedback_format: row.get(6)?,
                default_mark: row.get(7)?,
                penalty: row.get(8)?,
                length: row.get(9)?,
                hidden: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(questions)
}

fn load_rows(conn: &Connection, question_id: i64) -> anyhow::Result<Vec<MtfRow>> {
    let mut stmt = conn.prepare(
        "SELECT number, option_text, option_text_format, option_feedback, option_feedback_format
         FROM qtype_mtf_rows WHERE question_id = ? ORDER BY number ASC",
    )?;
    let rows = stmt
        .query_map([question_id], |row| {
            Ok(MtfRow {
                number: row.get(0)?,
                option_text: row.get(1)?,
                option_text_format: row.get(2)?,
                option_feedback: row.get(3)?,
                option_feedback_format: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_weights(conn: &Connection, question_id: i64) -> anyhow::Result<Vec<WeightRecord>> {
    let mut stmt = conn.prepare(
        "SELECT row_number, column_number, weight
         FROM qtype_mtf_weights WHERE question_id = ? ORDER BY id ASC",
    )?;
    let weights = stmt
        .query_map([question_id], |row| {
            Ok(WeightRecord {
                row_number: row.get(0)?,
                column_number: row.get(1)?,
                weight: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(weights)
}

fn load_mtf_options(conn: &Connection, question_id: i64) -> anyhow::Result<MtfOptions> {
    conn.query_row(
        "SELECT shuffle_answers, answer_numbering FROM qtype_mtf_options WHERE question_id = ?",
        [question_id],
        |row| {
            Ok(MtfOptions {
                shuffle_answers: row.get(0)?,
                answer_numbering: row.get(1)?,
            })
        },
    )
    .with_context(|| format!("mtf options missing for question {}", question_id))
}

fn load_category(conn: &Connection, category_id: i64) -> anyhow::Result<CategoryRecord> {
    conn.query_row(
        "SELECT id, context_id, name, info, sort_order FROM question_categories WHERE id = ?",
        [category_id],
        |row| {
            Ok(CategoryRecord {
                id: row.get(0)?,
                context_id: row.get(1)?,
                name: row.get(2)?,
                info: row.get(3)?,
                sort_order: row.get(4)?,
            })
        },
    )
    .with_context(|| format!("question category {} vanished mid-run", category_id))
}

/// Duplicates the source category once per run, memoizing the mapping.
/// Returns the destination category id.
fn ensure_category(
    tx: &Connection,
    run: &mut MigrationRun,
    source_category_id: i64,
    out: &mut dyn Write,
) -> anyhow::Result<i64> {
    if let Some(new_id) = run.category_map.get(&source_category_id) {
        return Ok(*new_id);
    }

    let source = load_category(tx, source_category_id)?;
    let new_name = format!("{}{}", source.name, CATEGORY_NAME_SUFFIX);
    tx.execute(
        "INSERT INTO question_categories(context_id, name, info, stamp, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        params![
            source.context_id,
            new_name,
            source.info,
            new_stamp(),
            source.sort_order,
        ],
    )?;
    let new_id = tx.last_insert_rowid();
    run.category_map.insert(source.id, new_id);
    run.num_categories_created += 1;
    writeln!(
        out,
        "[ADDED] category \"{}\" >>> \"{}\" (ID: {})",
        source.name, new_name, new_id
    )?;
    Ok(new_id)
}

/// Migrates one source question inside the run transaction: destination
/// question, one answer per row, one multichoice options row.
fn migrate_question(
    tx: &Connection,
    run: &mut MigrationRun,
    question: &SourceQuestion,
    opts: &RunOptions,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let rows = load_rows(tx, question.id)?;
    let mtf_options = load_mtf_options(tx, question.id)?;
    let weights = load_weights(tx, question.id)?;

    let fraction_map = match fractions::map_weights(&weights) {
        Ok(map) => map,
        Err(err) => {
            writeln!(
                out,
                "[SKIP]  question \"{}\" (ID: {}): {}",
                question.name, question.id, err
            )?;
            run.skipped.push(SkippedQuestion {
                id: question.id,
                name: question.name.clone(),
                reason: err.to_string(),
            });
            return Ok(());
        }
    };
    if let Some(warning) = &fraction_map.warning {
        writeln!(
            out,
            "[WARN]  question \"{}\" (ID: {}): {}",
            question.name, question.id, warning
        )?;
    }

    let new_category_id = ensure_category(tx, run, question.category_id, out)?;

    let now = Utc::now();
    let new_name = destination_name(&question.name, &now);
    tx.execute(
        "INSERT INTO questions(category_id, name, questiontext, questiontext_format,
            general_feedback, general_feedback_format, default_mark, penalty, qtype,
            length, stamp, version, hidden, timecreated, timemodified, createdby, modifiedby)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'multichoice', ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            new_category_id,
            new_name,
            question.questiontext,
            question.questiontext_format,
            question.general_feedback,
            question.general_feedback_format,
            question.default_mark,
            question.penalty,
            question.length,
            new_stamp(),
            new_stamp(),
            question.hidden,
            now.timestamp(),
            now.timestamp(),
            opts.actor_id,
            opts.actor_id,
        ],
    )?;
    let new_question_id = tx.last_insert_rowid();

    // Rows are ordered ascending; a row that never got a column-1 weight
    // is scored as incorrect.
    let default_negative = -1.0 / fraction_map.num_rows as f64;
    for row in &rows {
        let fraction = fraction_map
            .by_row
            .get(&row.number)
            .copied()
            .unwrap_or(default_negative);
        tx.execute(
            "INSERT INTO question_answers(question_id, answer, answer_format, fraction,
                feedback, feedback_format)
             VALUES(?, ?, ?, ?, ?, ?)",
            params![
                new_question_id,
                row.option_text,
                row.option_text_format,
                fraction,
                row.option_feedback,
                row.option_feedback_format,
            ],
        )?;
    }

    tx.execute(
        "INSERT INTO qtype_multichoice_options(question_id, layout, single, shuffle_answers,
            correct_feedback, correct_feedback_format,
            partially_correct_feedback, partially_correct_feedback_format,
            incorrect_feedback, incorrect_feedback_format,
            answer_numbering, show_num_correct)
         VALUES(?, 0, 0, ?, ?, 1, ?, 1, ?, 1, ?, 1)",
        params![
            new_question_id,
            mtf_options.shuffle_answers,
            CORRECT_FEEDBACK,
            PARTIALLY_CORRECT_FEEDBACK,
            INCORRECT_FEEDBACK,
            mtf_options.answer_numbering,
        ],
    )?;

    run.num_migrated += 1;
    writeln!(
        out,
        "[ADDED] question \"{}\" (ID: {}) >>> \"{}\" (ID: {})",
        question.name, question.id, new_name, new_question_id
    )?;
    Ok(())
}

/// Runs the whole migration: scope resolution, question selection, one
/// transaction around every write. A dry run abandons the transaction
/// instead of committing, so the store is left byte-for-byte untouched.
pub fn run_migration(
    conn: &mut Connection,
    scope: Scope,
    opts: &RunOptions,
    out: &mut dyn Write,
) -> anyhow::Result<RunReport> {
    let started = Instant::now();

    let category_ids = resolve_scope(conn, scope)?;
    match scope {
        Scope::All => writeln!(out, "Migration of all MTF questions")?,
        Scope::Course(id) => writeln!(out, "Migration of MTF questions within course {}", id)?,
        Scope::Category(id) => {
            writeln!(out, "Migration of MTF questions within category {}", id)?
        }
    }

    let questions = select_questions(conn, &category_ids)?;
    writeln!(out, "Questions found: {}", questions.len())?;

    let mut run = MigrationRun::default();
    let tx = conn.transaction()?;
    for question in &questions {
        migrate_question(&tx, &mut run, question, opts, out)?;
    }
    if !opts.dry_run {
        tx.commit()?;
    }
    // A dry run drops the transaction here, which rolls everything back.

    Ok(RunReport {
        dry_run: opts.dry_run,
        questions_found: questions.len(),
        num_migrated: run.num_migrated,
        num_categories_created: run.num_categories_created,
        skipped: run.skipped,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn destination_name_appends_timestamped_suffix() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let name = destination_name("Anatomy basics", &now);
        assert_eq!(name, "Anatomy basics (MC 2024-03-01 12:30:05)");
    }

    #[test]
    fn destination_name_is_bounded_to_255_chars() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        let long = "x".repeat(300);
        let name = destination_name(&long, &now);
        assert_eq!(name.chars().count(), MAX_QUESTION_NAME_CHARS);
        assert!(name.starts_with("xxx"));
    }

    #[test]
    fn scope_errors_name_the_missing_record() {
        assert_eq!(
            ScopeError::CourseNotFound(55).to_string(),
            "course with id 55 not found"
        );
        assert_eq!(
            ScopeError::CategoryNotFound(7).to_string(),
            "question category with id 7 not found"
        );
        assert!(ScopeError::NoCategoriesInCourse(3)
            .to_string()
            .contains("refusing to run without restrictions"));
    }
}
