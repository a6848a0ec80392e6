use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use crate::model::TierScore;

const DESTRUCTIVE_OPERATIONS: &[(&str, &str)] = &[
    (r"\bINSERT\s+INTO\b", "INSERT"),
    (r"\bUPDATE\b", "UPDATE"),
    (r"\bDELETE\s+FROM\b", "DELETE"),
    (r"\bDROP\s+(TABLE|DATABASE|SCHEMA|INDEX)\b", "DROP"),
    (r"\bTRUNCATE\s+TABLE\b", "TRUNCATE"),
    (r"\bALTER\s+TABLE\b", "ALTER TABLE"),
    (r"\bCREATE\s+(TABLE|DATABASE|SCHEMA|INDEX)\b", "CREATE"),
    (r"\bEXEC(UTE)?\s*\(", "EXECUTE"),
    (r"\bGRANT\b", "GRANT"),
    (r"\bREVOKE\b", "REVOKE"),
];

const INJECTION_PATTERNS: &[(&str, &str)] = &[
    (r"--", "SQL comment injection (--)"),
    (r"/\*.*\*/", "Multi-line comment injection (/* */)"),
    (r";\s*DROP\b", "Statement chaining with DROP"),
    (r";\s*DELETE\b", "Statement chaining with DELETE"),
    (r"\bOR\s+1\s*=\s*1\b", "OR 1=1 injection"),
    (r"\bOR\s+'[^']*'\s*=\s*'[^']*'", "OR 'x'='x' injection"),
    (r"\bUNION\s+SELECT\b", "UNION SELECT injection"),
    (r"'\s*OR\s*'", "Quote-based OR injection"),
    (r"\bEXEC\s*\(", "Dynamic SQL execution"),
    (r"\bxp_cmdshell\b", "Command shell execution"),
];

#[derive(Debug)]
pub struct RuleTable {
    rules: Vec<(Regex, &'static str)>,
}

impl RuleTable {
    pub fn compile(table: &[(&str, &'static str)]) -> Result<Self> {
        let rules = table
            .iter()
            .map(|(pattern, label)| {
                case_insensitive(pattern)
                    .with_context(|| format!("failed to compile rule `{label}`"))
                    .map(|regex| (regex, *label))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn first_match(&self, text: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .map(|(_, label)| *label)
    }
}

#[derive(Debug)]
pub struct SecurityGate {
    destructive: RuleTable,
    injection: RuleTable,
    owner_column: String,
}

impl SecurityGate {
    pub fn new(owner_column: &str) -> Result<Self> {
        Ok(Self {
            destructive: RuleTable::compile(DESTRUCTIVE_OPERATIONS)?,
            injection: RuleTable::compile(INJECTION_PATTERNS)?,
            owner_column: owner_column.to_string(),
        })
    }

    pub fn evaluate(&self, sql: &str, expected_owner_id: i64) -> TierScore {
        if let Some(operation) = self.destructive.first_match(sql) {
            return TierScore::fail(format!(
                "CRITICAL: Dangerous operation detected ({operation})"
            ));
        }

        if let Some(pattern) = self.injection.first_match(sql) {
            return TierScore::fail(format!(
                "CRITICAL: SQL injection pattern detected ({pattern})"
            ));
        }

        match self.has_owner_filter(sql, expected_owner_id) {
            Ok(true) => TierScore::pass(format!(
                "Security check passed ({} = {expected_owner_id})",
                self.owner_column
            )),
            Ok(false) => TierScore::fail(format!(
                "CRITICAL: Missing or incorrect owner filter (expected {} = {expected_owner_id})",
                self.owner_column
            )),
            Err(err) => TierScore::fail(format!("CRITICAL: Owner filter check failed: {err:#}")),
        }
    }

    fn has_owner_filter(&self, sql: &str, expected_owner_id: i64) -> Result<bool> {
        let column = regex::escape(&self.owner_column);
        let owner = regex::escape(&expected_owner_id.to_string());
        let patterns = [
            format!(r"\b{column}\s*=\s*{owner}\b"),
            format!(r"\b{column}\s+IN\s*\(\s*{owner}\s*\)"),
        ];

        for pattern in &patterns {
            if case_insensitive(pattern)
                .context("failed to compile owner filter regex")?
                .is_match(sql)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
