use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Routing-relevant kind of a client statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT`; `locked` when it takes row locks (`FOR UPDATE` and friends)
    Select { locked: bool },
    /// `SHOW`, `DESC`, `DESCRIBE`, `EXPLAIN`
    Show,
    /// `SHOW PROXY STATUS` / `SHOW AEGIS STATUS`, answered by the proxy itself
    ShowProxyStatus,
    /// `USE db`
    Use(String),
    /// Anything else
    Other,
}

impl StatementKind {
    /// Label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select { .. } => "select",
            StatementKind::Show => "show",
            StatementKind::ShowProxyStatus => "proxy_status",
            StatementKind::Use(_) => "use",
            StatementKind::Other => "other",
        }
    }

    /// Whether a replica may serve the statement
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            StatementKind::Select { locked: false } | StatementKind::Show
        )
    }
}

/// Classifier errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Failed to parse SQL: {0}")]
    ParseError(String),

    #[error("Empty statement")]
    EmptyStatement,
}

/// Turns a query string into a [`StatementKind`]
pub struct SqlClassifier {
    dialect: MySqlDialect,
}

impl SqlClassifier {
    pub fn new() -> Self {
        Self {
            dialect: MySqlDialect {},
        }
    }

    pub fn classify(&self, sql: &str) -> Result<StatementKind, ClassifyError> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        if sql.is_empty() {
            return Err(ClassifyError::EmptyStatement);
        }

        let words: Vec<String> = sql
            .split_whitespace()
            .take(3)
            .map(|w| w.to_ascii_uppercase())
            .collect();
        let first = words.first().map(String::as_str).unwrap_or_default();

        // Statements the proxy answers or routes without a parse tree
        match first {
            "SHOW" => {
                let rest: Vec<&str> = words.iter().skip(1).map(String::as_str).collect();
                return Ok(match rest.as_slice() {
                    ["PROXY", "STATUS"] | ["AEGIS", "STATUS"] if word_count(sql) == 3 => {
                        StatementKind::ShowProxyStatus
                    }
                    _ => StatementKind::Show,
                });
            }
            "DESC" | "DESCRIBE" | "EXPLAIN" => return Ok(StatementKind::Show),
            "USE" => {
                let db = sql[3..].trim().trim_matches('`');
                if db.is_empty() || db.contains(char::is_whitespace) {
                    return Err(ClassifyError::ParseError(format!(
                        "invalid USE statement: {}",
                        sql
                    )));
                }
                return Ok(StatementKind::Use(db.to_string()));
            }
            _ => {}
        }

        // MySQL's legacy shared-lock suffix is not understood by the parser
        let (sql, share_lock) = strip_share_mode(sql);

        let statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| ClassifyError::ParseError(e.to_string()))?;
        let stmt = statements.first().ok_or(ClassifyError::EmptyStatement)?;

        let kind = match stmt {
            Statement::Query(query) => StatementKind::Select {
                locked: share_lock || !query.locks.is_empty(),
            },
            Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowVariables { .. }
            | Statement::ShowCreate { .. }
            | Statement::ExplainTable { .. }
            | Statement::Explain { .. } => StatementKind::Show,
            _ => StatementKind::Other,
        };
        debug!(kind = kind.as_str(), "Classified statement");
        Ok(kind)
    }
}

impl Default for SqlClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn word_count(sql: &str) -> usize {
    sql.split_whitespace().count()
}

fn strip_share_mode(sql: &str) -> (&str, bool) {
    const SUFFIX: [&str; 4] = ["MODE", "SHARE", "IN", "LOCK"];

    let mut end = sql.len();
    for word in SUFFIX {
        let head = sql[..end].trim_end();
        match head.rsplit_once(char::is_whitespace) {
            Some((rest, last)) if last.eq_ignore_ascii_case(word) => end = rest.len(),
            _ => return (sql, false),
        }
    }
    (sql[..end].trim_end(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(sql: &str) -> StatementKind {
        SqlClassifier::new().classify(sql).unwrap()
    }

    #[test]
    fn test_select() {
        assert_eq!(classify("SELECT 1"), StatementKind::Select { locked: false });
        assert_eq!(
            classify("select * from users where id = 3;"),
            StatementKind::Select { locked: false }
        );
        assert!(classify("SELECT 1").is_read_only());
    }

    #[test]
    fn test_locked_select() {
        assert_eq!(
            classify("SELECT * FROM t WHERE id = 1 FOR UPDATE"),
            StatementKind::Select { locked: true }
        );
        assert_eq!(
            classify("SELECT * FROM t WHERE id = 1 LOCK IN SHARE MODE"),
            StatementKind::Select { locked: true }
        );
        assert!(!classify("SELECT * FROM t FOR UPDATE").is_read_only());
    }

    #[test]
    fn test_show() {
        assert_eq!(classify("SHOW TABLES"), StatementKind::Show);
        assert_eq!(classify("show databases"), StatementKind::Show);
        assert_eq!(classify("DESC users"), StatementKind::Show);
        assert_eq!(classify("EXPLAIN SELECT 1"), StatementKind::Show);
        assert_eq!(classify("SHOW PROXY STATUS"), StatementKind::ShowProxyStatus);
        assert_eq!(classify("show aegis status;"), StatementKind::ShowProxyStatus);
        assert_eq!(classify("SHOW PROXY STATUS LIKE 'x'"), StatementKind::Show);
    }

    #[test]
    fn test_use() {
        assert_eq!(classify("USE test"), StatementKind::Use("test".into()));
        assert_eq!(classify("use `my_db`;"), StatementKind::Use("my_db".into()));
        assert!(SqlClassifier::new().classify("USE").is_err());
    }

    #[test]
    fn test_other() {
        assert_eq!(
            classify("INSERT INTO t (a) VALUES (1)"),
            StatementKind::Other
        );
        assert_eq!(classify("UPDATE t SET a = 1"), StatementKind::Other);
    }

    #[test]
    fn test_errors() {
        let classifier = SqlClassifier::new();
        assert!(matches!(
            classifier.classify("   ;"),
            Err(ClassifyError::EmptyStatement)
        ));
        assert!(matches!(
            classifier.classify("SELEC 1 FROM"),
            Err(ClassifyError::ParseError(_))
        ));
    }

    #[test]
    fn test_strip_share_mode() {
        assert_eq!(
            strip_share_mode("select 1 lock in share mode"),
            ("select 1", true)
        );
        assert_eq!(strip_share_mode("select mode"), ("select mode", false));
    }
}
