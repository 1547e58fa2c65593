//! Training corpus planning.
//!
//! Turns a dataset's tables, business terms and relationship notes into the
//! ordered list of units a training job ingests:
//!
//! 1. one DDL unit per table
//! 2. one documentation unit per business term
//! 3. one documentation unit describing the tables and their relationships
//! 4. example question/SQL pairs for the first few tables

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unibi_core::{CorpusSpec, CorpusUnit};

use crate::constants::EXAMPLE_QUERY_TABLES;

static COLUMN_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^[`"\[]?(\w+)[`"\]]?\s+\w+"#).expect("Invalid column regex")
});

const NON_COLUMN_KEYWORDS: [&str; 7] = [
    "PRIMARY",
    "KEY",
    "CONSTRAINT",
    "FOREIGN",
    "INDEX",
    "UNIQUE",
    "CHECK",
];

/// A table of the dataset and its `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSource {
    pub name: String,
    pub ddl: String,
}

impl TableSource {
    pub fn new(name: impl Into<String>, ddl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ddl: ddl.into(),
        }
    }
}

/// A business term and its definition, e.g. "GMV".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessTerm {
    pub term: String,
    pub definition: String,
}

impl BusinessTerm {
    pub fn new(term: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            definition: definition.into(),
        }
    }

    pub fn to_unit(&self) -> CorpusUnit {
        CorpusUnit::Documentation {
            title: format!("business term {}", self.term),
            text: format!("Business term: {}\nDefinition: {}", self.term, self.definition),
        }
    }
}

/// Documentation unit for free-form relationship notes.
pub fn relationships_unit(table_names: &[&str], relationships: &[String]) -> CorpusUnit {
    let mut text = String::new();
    if !table_names.is_empty() {
        text.push_str(&format!(
            "This dataset contains the tables: {}\n",
            table_names.join(", ")
        ));
    }
    for relationship in relationships {
        text.push_str(relationship);
        text.push('\n');
    }
    text.push_str("Generate SQL from the table and column names above.");
    CorpusUnit::Documentation {
        title: "table relationships".to_string(),
        text,
    }
}

/// Column names of a `CREATE TABLE` statement, constraints skipped.
pub fn parse_columns(ddl: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (ddl.find('('), ddl.rfind(')')) else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }

    split_top_level(&ddl[open + 1..close])
        .into_iter()
        .filter_map(|definition| {
            let column = COLUMN_DEF.captures(definition.trim())?.get(1)?.as_str();
            if NON_COLUMN_KEYWORDS.contains(&column.to_uppercase().as_str()) {
                None
            } else {
                Some(column.to_string())
            }
        })
        .collect()
}

/// Split on commas that are not nested in parentheses (`DECIMAL(10,2)`).
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Builds training corpora.
#[derive(Debug, Clone, Copy)]
pub struct CorpusPlanner {
    example_tables: usize,
}

impl Default for CorpusPlanner {
    fn default() -> Self {
        Self {
            example_tables: EXAMPLE_QUERY_TABLES,
        }
    }
}

impl CorpusPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate example queries for the first `n` tables only.
    pub fn with_example_tables(mut self, n: usize) -> Self {
        self.example_tables = n;
        self
    }

    /// Full training plan for a dataset.
    pub fn plan(
        &self,
        tables: &[TableSource],
        terms: &[BusinessTerm],
        relationships: &[String],
    ) -> CorpusSpec {
        let mut units: Vec<CorpusUnit> = tables
            .iter()
            .map(|table| CorpusUnit::Ddl {
                table: table.name.clone(),
                statement: table.ddl.clone(),
            })
            .collect();

        units.extend(terms.iter().map(BusinessTerm::to_unit));

        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        units.push(relationships_unit(&names, relationships));

        for table in tables.iter().take(self.example_tables) {
            units.extend(example_queries(table));
        }

        CorpusSpec::new(units).with_label("full training")
    }
}

fn example_queries(table: &TableSource) -> Vec<CorpusUnit> {
    let name = &table.name;
    let mut examples = vec![
        CorpusUnit::QuestionSql {
            question: format!("Show all rows of {}", name),
            sql: format!("SELECT * FROM {} LIMIT 100", name),
        },
        CorpusUnit::QuestionSql {
            question: format!("How many rows does {} have", name),
            sql: format!("SELECT COUNT(*) AS total FROM {}", name),
        },
    ];

    let columns = parse_columns(&table.ddl);
    if columns.len() < 2 {
        return examples;
    }

    let first = &columns[0];
    examples.push(CorpusUnit::QuestionSql {
        question: format!("Count {} by {}", name, first),
        sql: format!(
            "SELECT {first}, COUNT(*) AS count FROM {name} GROUP BY {first} LIMIT 100"
        ),
    });

    let ordering = columns.iter().find_map(|col| {
        let lower = col.to_lowercase();
        if lower.contains("date") || lower.contains("time") {
            Some((col, format!("Latest rows of {} by {}", name, col)))
        } else if ["amount", "quantity", "price", "total"]
            .iter()
            .any(|hint| lower.contains(hint))
        {
            Some((col, format!("Rows of {} with the largest {}", name, col)))
        } else {
            None
        }
    });
    if let Some((col, question)) = ordering {
        examples.push(CorpusUnit::QuestionSql {
            question,
            sql: format!("SELECT * FROM {} ORDER BY {} DESC LIMIT 10", name, col),
        });
    }

    examples
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS_DDL: &str = "CREATE TABLE orders (\n  `id` INT NOT NULL,\n  region VARCHAR(32),\n  total DECIMAL(10,2),\n  created_at TIMESTAMP,\n  PRIMARY KEY (id)\n)";

    #[test]
    fn test_parse_columns_skips_constraints() {
        assert_eq!(
            parse_columns(ORDERS_DDL),
            vec!["id", "region", "total", "created_at"]
        );
    }

    #[test]
    fn test_parse_columns_without_body() {
        assert!(parse_columns("CREATE VIEW v AS SELECT 1").is_empty());
        assert!(parse_columns(") broken (").is_empty());
    }

    #[test]
    fn test_examples_for_orders() {
        let examples = example_queries(&TableSource::new("orders", ORDERS_DDL));
        let sqls: Vec<String> = examples
            .iter()
            .map(|unit| match unit {
                CorpusUnit::QuestionSql { sql, .. } => sql.clone(),
                other => panic!("unexpected unit {:?}", other),
            })
            .collect();
        assert_eq!(
            sqls,
            vec![
                "SELECT * FROM orders LIMIT 100",
                "SELECT COUNT(*) AS total FROM orders",
                "SELECT id, COUNT(*) AS count FROM orders GROUP BY id LIMIT 100",
                // "total" comes before "created_at"
                "SELECT * FROM orders ORDER BY total DESC LIMIT 10",
            ]
        );
    }

    #[test]
    fn test_plan_phase_order() {
        let tables: Vec<TableSource> = (0..4)
            .map(|i| TableSource::new(format!("t{}", i), format!("CREATE TABLE t{} (id INT)", i)))
            .collect();
        let terms = vec![BusinessTerm::new("GMV", "gross merchandise value")];
        let relationships = vec!["t0.id = t1.t0_id".to_string()];

        let plan = CorpusPlanner::new().plan(&tables, &terms, &relationships);

        // 4 DDL + 1 term + 1 relationships doc + 2 examples for each of 3 tables
        assert_eq!(plan.len(), 4 + 1 + 1 + 6);
        assert!(matches!(&plan.units[0], CorpusUnit::Ddl { table, .. } if table == "t0"));
        assert!(matches!(&plan.units[4], CorpusUnit::Documentation { text, .. } if text.contains("GMV")));
        match &plan.units[5] {
            CorpusUnit::Documentation { text, .. } => {
                assert!(text.contains("t0, t1, t2, t3"));
                assert!(text.contains("t0.id = t1.t0_id"));
            }
            other => panic!("unexpected unit {:?}", other),
        }
        assert!(plan.units[6..]
            .iter()
            .all(|u| matches!(u, CorpusUnit::QuestionSql { .. })));
        assert_eq!(plan.label.as_deref(), Some("full training"));
    }
}
