use mtf_migrate::db::open_db;
use mtf_migrate::migrate::{run_migration, RunOptions, Scope};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seed_category(conn: &Connection, id: i64, context_id: i64, name: &str) {
    conn.execute(
        "INSERT INTO question_categories(id, context_id, name, stamp) VALUES(?, ?, ?, ?)",
        params![id, context_id, name, format!("stamp-cat-{}", id)],
    )
    .expect("seed category");
}

fn seed_mtf_question(conn: &Connection, id: i64, category_id: i64, name: &str, weights: &[f64]) {
    conn.execute(
        "INSERT INTO questions(id, category_id, name, qtype, stamp, version)
         VALUES(?, ?, ?, 'mtf', ?, ?)",
        params![id, category_id, name, format!("stamp-q-{}", id), "v1"],
    )
    .expect("seed question");
    conn.execute(
        "INSERT INTO qtype_mtf_options(question_id, shuffle_answers, answer_numbering)
         VALUES(?, 1, 'abc')",
        params![id],
    )
    .expect("seed mtf options");
    for (i, weight) in weights.iter().enumerate() {
        let number = (i + 1) as i64;
        conn.execute(
            "INSERT INTO qtype_mtf_rows(question_id, number, option_text, option_feedback)
             VALUES(?, ?, ?, ?)",
            params![id, number, format!("Row {}", number), format!("Feedback {}", number)],
        )
        .expect("seed row");
        conn.execute(
            "INSERT INTO qtype_mtf_weights(question_id, row_number, column_number, weight)
             VALUES(?, ?, 1, ?)",
            params![id, number, weight],
        )
        .expect("seed judgement weight");
        // The "false" column; the mapper must ignore it.
        conn.execute(
            "INSERT INTO qtype_mtf_weights(question_id, row_number, column_number, weight)
             VALUES(?, ?, 2, ?)",
            params![id, number, -weight],
        )
        .expect("seed second column weight");
    }
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .expect("count")
}

#[test]
fn dry_run_is_idempotent_and_leaves_every_table_unchanged() {
    let workspace = temp_dir("mtf-migrate-dryrun");
    let mut conn = open_db(&workspace).expect("open workspace db");

    seed_category(&conn, 7, 100, "Term 1");
    seed_mtf_question(&conn, 1, 7, "Photosynthesis", &[1.0, 1.0, -1.0]);
    seed_mtf_question(&conn, 2, 7, "All wrong", &[-1.0, -1.0]);
    seed_mtf_question(&conn, 3, 7, "Cell division", &[1.0, -1.0]);

    let tables = [
        "question_categories",
        "questions",
        "question_answers",
        "qtype_multichoice_options",
        "qtype_mtf_rows",
        "qtype_mtf_weights",
        "qtype_mtf_options",
    ];
    let before: Vec<i64> = tables.iter().map(|t| count(&conn, t)).collect();

    let opts = RunOptions {
        dry_run: true,
        actor_id: 2,
    };

    let mut log_a = Vec::new();
    let report_a = run_migration(&mut conn, Scope::Category(7), &opts, &mut log_a)
        .expect("first dry run");
    let mut log_b = Vec::new();
    let report_b = run_migration(&mut conn, Scope::Category(7), &opts, &mut log_b)
        .expect("second dry run");

    // Same store state in, same classifications out.
    assert_eq!(report_a.questions_found, 3);
    assert_eq!(report_b.questions_found, 3);
    assert_eq!(report_a.num_migrated, 2);
    assert_eq!(report_b.num_migrated, 2);
    assert_eq!(report_a.skipped.len(), 1);
    assert_eq!(report_a.skipped[0].id, report_b.skipped[0].id);
    assert_eq!(report_a.skipped[0].reason, report_b.skipped[0].reason);

    // Zero net writes, in every destination table and everywhere else.
    let after: Vec<i64> = tables.iter().map(|t| count(&conn, t)).collect();
    assert_eq!(before, after);

    // The log still reports the work that would have happened.
    let log = String::from_utf8(log_a).expect("utf8 log");
    assert!(log.contains("[ADDED] category"));
    assert!(log.contains("[ADDED] question \"Photosynthesis\""));
    assert!(log.contains("[SKIP]  question \"All wrong\""));
}
