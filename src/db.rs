use anyhow::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::PathBuf;
use tokio::fs;

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let conn = Database::connect(database_url).await?;
    Ok(conn)
}

/// Minimal migration runner that executes SQL files in `migrations/` in filename order.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    let mut entries = fs::read_dir("migrations").await?;
    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    let backend = conn.get_database_backend();
    for file in files {
        let sql = fs::read_to_string(&file).await?;
        tracing::debug!(file = %file.display(), "applying migration");
        // Postgres prepared statements cannot contain multiple commands,
        // so split the migration file and run each statement individually.
        for statement in split_statements(&sql) {
            conn.execute(Statement::from_string(backend, statement))
                .await?;
        }
    }

    Ok(())
}

/// Splits a SQL script on `;`, leaving dollar-quoted bodies (`$$ ... $$`)
/// and `--` line comments intact.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_dollar = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' if chars.peek() == Some(&'$') => {
                chars.next();
                current.push_str("$$");
                in_dollar = !in_dollar;
            }
            '-' if !in_dollar && chars.peek() == Some(&'-') => {
                // skip to end of line
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_dollar => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let stmt = raw.trim();
    if !stmt.is_empty() {
        statements.push(format!("{stmt};"));
    }
}

#[cfg(test)]
mod tests {
    use super::split_statements;

    #[test]
    fn splits_plain_statements() {
        let sql = "CREATE TABLE a (id int);\n\nCREATE TABLE b (id int);\n";
        assert_eq!(
            split_statements(sql),
            vec!["CREATE TABLE a (id int);", "CREATE TABLE b (id int);"]
        );
    }

    #[test]
    fn keeps_dollar_quoted_bodies_whole() {
        let sql = r#"
CREATE FUNCTION f() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify('c', 'x');
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;
SELECT 1;
"#;
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("RETURN NEW;"));
        assert!(statements[0].ends_with("LANGUAGE plpgsql;"));
        assert_eq!(statements[1], "SELECT 1;");
    }

    #[test]
    fn drops_comments_and_blank_statements() {
        let sql = "-- header; with a semicolon\n;;SELECT 2; -- trailing\n";
        assert_eq!(split_statements(sql), vec!["SELECT 2;"]);
    }
}
