use rusqlite::Connection;
use std::path::Path;

/// Opens (creating if necessary) the question-bank workspace database.
///
/// The schema mirrors the host LMS tables this tool touches: the shared
/// `questions` table holds both the MTF sources (`qtype = 'mtf'`) and the
/// multichoice questions this tool creates (`qtype = 'multichoice'`).
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("questionbank.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            is_admin INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            fullname TEXT NOT NULL,
            context_id INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_categories(
            id INTEGER PRIMARY KEY,
            context_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            info TEXT NOT NULL DEFAULT '',
            stamp TEXT NOT NULL UNIQUE,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_categories_context
         ON question_categories(context_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id INTEGER PRIMARY KEY,
            category_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            questiontext TEXT NOT NULL DEFAULT '',
            questiontext_format INTEGER NOT NULL DEFAULT 1,
            general_feedback TEXT NOT NULL DEFAULT '',
            general_feedback_format INTEGER NOT NULL DEFAULT 1,
            default_mark REAL NOT NULL DEFAULT 1.0,
            penalty REAL NOT NULL DEFAULT 0.0,
            qtype TEXT NOT NULL,
            length INTEGER NOT NULL DEFAULT 1,
            stamp TEXT NOT NULL,
            version TEXT NOT NULL,
            hidden INTEGER NOT NULL DEFAULT 0,
            timecreated INTEGER NOT NULL DEFAULT 0,
            timemodified INTEGER NOT NULL DEFAULT 0,
            createdby INTEGER NOT NULL DEFAULT 0,
            modifiedby INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(category_id) REFERENCES question_categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_category ON questions(category_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_qtype ON questions(qtype)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qtype_mtf_options(
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL UNIQUE,
            scoring_method TEXT NOT NULL DEFAULT 'subpoints',
            shuffle_answers INTEGER NOT NULL DEFAULT 1,
            answer_numbering TEXT NOT NULL DEFAULT 'abc',
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qtype_mtf_rows(
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL,
            number INTEGER NOT NULL,
            option_text TEXT NOT NULL,
            option_text_format INTEGER NOT NULL DEFAULT 1,
            option_feedback TEXT NOT NULL DEFAULT '',
            option_feedback_format INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(question_id, number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mtf_rows_question ON qtype_mtf_rows(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qtype_mtf_weights(
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL,
            row_number INTEGER NOT NULL,
            column_number INTEGER NOT NULL,
            weight REAL NOT NULL,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(question_id, row_number, column_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mtf_weights_question ON qtype_mtf_weights(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_answers(
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL,
            answer TEXT NOT NULL,
            answer_format INTEGER NOT NULL DEFAULT 1,
            fraction REAL NOT NULL,
            feedback TEXT NOT NULL DEFAULT '',
            feedback_format INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_answers_question
         ON question_answers(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS qtype_multichoice_options(
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL UNIQUE,
            layout INTEGER NOT NULL DEFAULT 0,
            single INTEGER NOT NULL DEFAULT 0,
            shuffle_answers INTEGER NOT NULL DEFAULT 1,
            correct_feedback TEXT NOT NULL DEFAULT '',
            correct_feedback_format INTEGER NOT NULL DEFAULT 1,
            partially_correct_feedback TEXT NOT NULL DEFAULT '',
            partially_correct_feedback_format INTEGER NOT NULL DEFAULT 1,
            incorrect_feedback TEXT NOT NULL DEFAULT '',
            incorrect_feedback_format INTEGER NOT NULL DEFAULT 1,
            answer_numbering TEXT NOT NULL DEFAULT 'abc',
            show_num_correct INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;

    Ok(conn)
}

pub fn is_site_admin(conn: &Connection, user_id: i64) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare("SELECT is_admin FROM users WHERE id = ?")?;
    let mut rows = stmt.query([user_id])?;
    match rows.next()? {
        Some(row) => Ok(row.get::<_, i64>(0)? != 0),
        None => Ok(false),
    }
}
