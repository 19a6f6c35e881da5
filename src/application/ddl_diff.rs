use std::collections::HashMap;

use crate::domain::ports::QueryDialect;
use crate::domain::structure_diff::{StructureDiff, StructureState};
use crate::domain::value_objects::{ObjectDescriptor, ObjectType};

// ─── CREATE TABLE parsing ────────────────────────────────────────────────────

/// Body of a CREATE TABLE statement split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDefinition {
    /// Column definition lines, whitespace-normalised, in declared order.
    pub columns: Vec<String>,
    /// PRIMARY KEY / KEY / INDEX / CONSTRAINT … lines.
    pub keys: Vec<String>,
    /// Everything after the closing parenthesis (engine, charset, partitioning).
    pub options: String,
}

/// Leading keywords of key and constraint lines. `PRIMARY` and `FOREIGN`
/// only count when followed by `KEY`.
const KEY_KEYWORDS: [&str; 8] = [
    "KEY",
    "INDEX",
    "UNIQUE",
    "CONSTRAINT",
    "FULLTEXT",
    "SPATIAL",
    "CHECK",
    "EXCLUDE",
];

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matches whole keywords only, so columns such as `unique_code` or
/// `checked_at` stay column lines.
fn is_key_line(line: &str) -> bool {
    let upper = line.to_uppercase();
    let mut tokens = upper
        .split(|c: char| c.is_whitespace() || c == '(')
        .filter(|t| !t.is_empty());
    match (tokens.next(), tokens.next()) {
        (Some("PRIMARY" | "FOREIGN"), Some("KEY")) => true,
        (Some(first), _) => KEY_KEYWORDS.contains(&first),
        (None, _) => false,
    }
}

/// First token of a column definition, as written (quotes kept).
fn name_token(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// Column name with identifier quotes removed, for pairing lines.
fn column_name(line: &str) -> String {
    name_token(line)
        .trim_matches(|c| c == '`' || c == '"' || c == '[' || c == ']')
        .to_string()
}

/// Parse the column region of a CREATE TABLE statement.
///
/// Commas inside parentheses or quotes do not split definitions, so
/// `DECIMAL(10,2)` and `DEFAULT 'a,b'` stay on one line. Returns `None` when
/// no parenthesised body is found.
pub fn parse_table_definition(ddl: &str) -> Option<TableDefinition> {
    let open = ddl.find('(')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut close = None;

    for (offset, ch) in ddl[open..].char_indices() {
        let idx = open + offset;
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                if depth > 1 {
                    current.push(ch);
                }
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
                current.push(ch);
            }
            ',' if depth == 1 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }

    let close = close?;
    parts.push(current);

    let mut def = TableDefinition {
        options: normalize(ddl[close + 1..].trim_end_matches(';')),
        ..Default::default()
    };
    for part in parts {
        let line = normalize(&part);
        if line.is_empty() {
            continue;
        }
        if is_key_line(&line) {
            def.keys.push(line);
        } else {
            def.columns.push(line);
        }
    }
    Some(def)
}

/// Drop volatile options (AUTO_INCREMENT counters) before comparing.
fn comparable_options(options: &str) -> String {
    options
        .split_whitespace()
        .filter(|tok| !tok.to_uppercase().starts_with("AUTO_INCREMENT="))
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Line diff ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    /// Line only in the source definition.
    SourceOnly(usize),
    /// Line only in the target definition.
    TargetOnly(usize),
}

/// Longest-common-subsequence alignment of two line lists.
fn diff_lines(a: &[String], b: &[String]) -> Vec<Op> {
    let (n, m) = (a.len(), b.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::SourceOnly(i));
            i += 1;
        } else {
            ops.push(Op::TargetOnly(j));
            j += 1;
        }
    }
    ops.extend((i..n).map(Op::SourceOnly));
    ops.extend((j..m).map(Op::TargetOnly));
    ops
}

// ─── Structural diff ─────────────────────────────────────────────────────────

/// Diff two CREATE statements of the same object.
///
/// Repairs bring the target's definition in line with the source's.
pub fn diff_definitions(
    object: &ObjectDescriptor,
    source_ddl: &str,
    target_ddl: &str,
    dialect: &dyn QueryDialect,
) -> StructureDiff {
    if source_ddl == target_ddl {
        return StructureDiff::identical(object.clone());
    }
    if object.object_type != ObjectType::Table {
        return diff_routine(object, source_ddl, target_ddl, dialect);
    }

    let (Some(src), Some(tgt)) = (
        parse_table_definition(source_ddl),
        parse_table_definition(target_ddl),
    ) else {
        let mut d = StructureDiff::identical(object.clone());
        if normalize(source_ddl) != normalize(target_ddl) {
            d.state = StructureState::Differs;
            d.diff_count = 1;
            d.unsupported = true;
            d.notes.push("definition could not be parsed".to_string());
        }
        return d;
    };

    diff_tables(object, &src, &tgt, dialect)
}

fn diff_tables(
    object: &ObjectDescriptor,
    src: &TableDefinition,
    tgt: &TableDefinition,
    dialect: &dyn QueryDialect,
) -> StructureDiff {
    let mut d = StructureDiff::identical(object.clone());

    let ops = diff_lines(&src.columns, &tgt.columns);
    let source_only: HashMap<String, usize> = ops
        .iter()
        .filter_map(|op| match op {
            Op::SourceOnly(i) => Some((column_name(&src.columns[*i]), *i)),
            _ => None,
        })
        .collect();
    let target_only: HashMap<String, usize> = ops
        .iter()
        .filter_map(|op| match op {
            Op::TargetOnly(j) => Some((column_name(&tgt.columns[*j]), *j)),
            _ => None,
        })
        .collect();

    let mut clauses = Vec::new();
    for op in &ops {
        match *op {
            Op::Equal => {}
            Op::SourceOnly(i) => {
                let line = &src.columns[i];
                let name = column_name(line);
                match target_only.get(&name) {
                    Some(&j) if tgt.columns[j] == *line => {
                        d.notes.push(format!("column {} moved; column order differs", name));
                        d.diff_count += 1;
                    }
                    Some(_) => {
                        clauses.push(format!("CHANGE {} {}", name_token(line), line));
                    }
                    None => clauses.push(format!("ADD {}", line)),
                }
            }
            Op::TargetOnly(j) => {
                let line = &tgt.columns[j];
                if !source_only.contains_key(&column_name(line)) {
                    clauses.push(format!("DROP COLUMN {}", name_token(line)));
                }
            }
        }
    }

    let mut src_keys = src.keys.clone();
    let mut tgt_keys = tgt.keys.clone();
    src_keys.sort();
    tgt_keys.sort();
    if src_keys != tgt_keys {
        let changed = src_keys.iter().filter(|k| !tgt_keys.contains(k)).count()
            + tgt_keys.iter().filter(|k| !src_keys.contains(k)).count();
        d.diff_count += changed;
        d.unsupported = true;
        d.notes
            .push("key or constraint definitions differ (not repaired)".to_string());
    }

    let (src_opts, tgt_opts) = (comparable_options(&src.options), comparable_options(&tgt.options));
    if src_opts != tgt_opts {
        d.diff_count += 1;
        d.unsupported = true;
        if src_opts.to_uppercase().contains("PARTITION BY")
            || tgt_opts.to_uppercase().contains("PARTITION BY")
        {
            d.notes.push("partitioning differs (not repaired)".to_string());
        } else {
            d.notes.push("table options differ (not repaired)".to_string());
        }
    }

    if !clauses.is_empty() {
        d.diff_count += clauses.len();
        d.repair_statements.push(format!(
            "ALTER TABLE {} {};",
            dialect.quote_ident(&object.name),
            clauses.join(", ")
        ));
    }
    if d.diff_count > 0 {
        d.state = StructureState::Differs;
    }
    d
}

/// Views, triggers and routines are replaced wholesale.
fn diff_routine(
    object: &ObjectDescriptor,
    source_ddl: &str,
    target_ddl: &str,
    dialect: &dyn QueryDialect,
) -> StructureDiff {
    if normalize(source_ddl) == normalize(target_ddl) {
        return StructureDiff::identical(object.clone());
    }
    StructureDiff {
        object: object.clone(),
        state: StructureState::Differs,
        diff_count: 1,
        repair_statements: vec![drop_statement(object, dialect), create_statement(source_ddl)],
        notes: Vec::new(),
        unsupported: false,
    }
}

pub fn drop_statement(object: &ObjectDescriptor, dialect: &dyn QueryDialect) -> String {
    format!(
        "DROP {} IF EXISTS {};",
        object.object_type,
        dialect.quote_ident(&object.name)
    )
}

pub fn create_statement(ddl: &str) -> String {
    let trimmed = ddl.trim();
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{};", trimmed)
    }
}

/// Pseudo-diff for an object that exists only in the source.
pub fn missing_in_target(object: &ObjectDescriptor, source_ddl: Option<&str>) -> StructureDiff {
    let mut d = StructureDiff::missing(
        object.clone(),
        StructureState::MissingInTarget,
        source_ddl.map(create_statement).into_iter().collect(),
    );
    if source_ddl.is_none() {
        d.notes.push("source definition unavailable".to_string());
    }
    d
}

/// Pseudo-diff for an object that exists only in the target.
pub fn missing_in_source(object: &ObjectDescriptor, dialect: &dyn QueryDialect) -> StructureDiff {
    StructureDiff::missing(
        object.clone(),
        StructureState::MissingInSource,
        vec![drop_statement(object, dialect)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::dialect::{MysqlDialect, SqliteDialect};

    const WITH_PHONE: &str = "CREATE TABLE users (\n  id INT NOT NULL,\n  name VARCHAR(50),\n  phone VARCHAR(20),\n  PRIMARY KEY (id)\n)";
    const WITHOUT_PHONE: &str = "CREATE TABLE users (\n  id INT NOT NULL,\n  name VARCHAR(50),\n  PRIMARY KEY (id)\n)";

    fn users() -> ObjectDescriptor {
        ObjectDescriptor::table("users")
    }

    #[test]
    fn parses_columns_keys_and_options() {
        let def = parse_table_definition(
            "CREATE TABLE `t` (\n `id` int NOT NULL,\n `price` decimal(10,2) DEFAULT '1,5',\n PRIMARY KEY (`id`),\n KEY `ix` (`price`)\n) ENGINE=InnoDB AUTO_INCREMENT=7;",
        )
        .unwrap();
        assert_eq!(
            def.columns,
            vec!["`id` int NOT NULL", "`price` decimal(10,2) DEFAULT '1,5'"]
        );
        assert_eq!(def.keys, vec!["PRIMARY KEY (`id`)", "KEY `ix` (`price`)"]);
        assert_eq!(def.options, "ENGINE=InnoDB AUTO_INCREMENT=7");
    }

    #[test]
    fn identical_text_is_identical() {
        let d = diff_definitions(&users(), WITH_PHONE, WITH_PHONE, &SqliteDialect);
        assert!(d.is_identical());
        assert_eq!(d.diff_count, 0);
    }

    #[test]
    fn extra_source_column_is_added() {
        let d = diff_definitions(&users(), WITH_PHONE, WITHOUT_PHONE, &SqliteDialect);
        assert_eq!(d.state, StructureState::Differs);
        assert_eq!(d.diff_count, 1);
        assert_eq!(
            d.repair_statements,
            vec![r#"ALTER TABLE "users" ADD phone VARCHAR(20);"#]
        );
    }

    #[test]
    fn columns_named_like_constraints_are_still_columns() {
        let t = ObjectDescriptor::table("t");
        let d = diff_definitions(
            &t,
            "CREATE TABLE t (id INT, unique_code TEXT, checked_at TEXT)",
            "CREATE TABLE t (id INT)",
            &SqliteDialect,
        );
        assert_eq!(
            d.repair_statements,
            vec![r#"ALTER TABLE "t" ADD unique_code TEXT, ADD checked_at TEXT;"#]
        );
        assert!(!d.unsupported);
        assert!(d.notes.is_empty());

        let def = parse_table_definition(
            "CREATE TABLE t (checksum CHAR(32), key_id INT, UNIQUE KEY uq (checksum), \
             CHECK(key_id > 0), PRIMARY KEY(key_id))",
        )
        .unwrap();
        assert_eq!(def.columns, vec!["checksum CHAR(32)", "key_id INT"]);
        assert_eq!(def.keys.len(), 3);
    }

    #[test]
    fn extra_target_column_is_dropped() {
        let d = diff_definitions(&users(), WITHOUT_PHONE, WITH_PHONE, &SqliteDialect);
        assert_eq!(d.diff_count, 1);
        assert_eq!(
            d.repair_statements,
            vec![r#"ALTER TABLE "users" DROP COLUMN phone;"#]
        );
    }

    #[test]
    fn altered_column_is_changed() {
        let target = WITH_PHONE.replace("phone VARCHAR(20)", "phone VARCHAR(10)");
        let d = diff_definitions(&users(), WITH_PHONE, &target, &MysqlDialect);
        assert_eq!(
            d.repair_statements,
            vec!["ALTER TABLE `users` CHANGE phone phone VARCHAR(20);"]
        );
        assert!(!d.unsupported);
    }

    #[test]
    fn several_deltas_share_one_alter() {
        let source = "CREATE TABLE t (a INT, b INT, c TEXT)";
        let target = "CREATE TABLE t (a INT, b BIGINT, d TEXT)";
        let d = diff_definitions(&ObjectDescriptor::table("t"), source, target, &SqliteDialect);
        assert_eq!(d.repair_statements.len(), 1);
        let alter = &d.repair_statements[0];
        assert!(alter.contains("CHANGE b b INT"), "{}", alter);
        assert!(alter.contains("ADD c TEXT"), "{}", alter);
        assert!(alter.contains("DROP COLUMN d"), "{}", alter);
        assert_eq!(d.diff_count, 3);
    }

    #[test]
    fn whitespace_only_difference_is_identical() {
        let target = WITH_PHONE.replace("  ", "    ");
        let d = diff_definitions(&users(), WITH_PHONE, &target, &SqliteDialect);
        assert!(d.is_identical());
    }

    #[test]
    fn reordered_column_is_a_note_not_a_repair() {
        let source = "CREATE TABLE t (a INT, b INT, c INT)";
        let target = "CREATE TABLE t (a INT, c INT, b INT)";
        let d = diff_definitions(&ObjectDescriptor::table("t"), source, target, &SqliteDialect);
        assert_eq!(d.state, StructureState::Differs);
        assert!(d.repair_statements.is_empty());
        assert!(d.notes.iter().any(|n| n.contains("order")));
    }

    #[test]
    fn key_changes_are_flagged_unsupported() {
        let target = WITH_PHONE.replace("PRIMARY KEY (id)", "PRIMARY KEY (id, name)");
        let d = diff_definitions(&users(), WITH_PHONE, &target, &SqliteDialect);
        assert!(d.unsupported);
        assert_eq!(d.state, StructureState::Differs);
        assert!(d.repair_statements.is_empty());
    }

    #[test]
    fn partition_changes_are_flagged_unsupported() {
        let source = "CREATE TABLE t (a INT) ENGINE=InnoDB PARTITION BY HASH(a) PARTITIONS 4";
        let target = "CREATE TABLE t (a INT) ENGINE=InnoDB";
        let d = diff_definitions(&ObjectDescriptor::table("t"), source, target, &MysqlDialect);
        assert!(d.unsupported);
        assert!(d.notes.iter().any(|n| n.contains("partitioning")));
    }

    #[test]
    fn auto_increment_counter_is_ignored() {
        let source = "CREATE TABLE t (a INT) ENGINE=InnoDB AUTO_INCREMENT=10";
        let target = "CREATE TABLE t (a INT) ENGINE=InnoDB AUTO_INCREMENT=99";
        let d = diff_definitions(&ObjectDescriptor::table("t"), source, target, &MysqlDialect);
        assert!(d.is_identical());
    }

    #[test]
    fn differing_view_is_dropped_and_recreated() {
        let view = ObjectDescriptor::new(ObjectType::View, "v_users");
        let d = diff_definitions(
            &view,
            "CREATE VIEW v_users AS SELECT id FROM users",
            "CREATE VIEW v_users AS SELECT id, name FROM users",
            &MysqlDialect,
        );
        assert_eq!(
            d.repair_statements,
            vec![
                "DROP VIEW IF EXISTS `v_users`;",
                "CREATE VIEW v_users AS SELECT id FROM users;",
            ]
        );
    }

    #[test]
    fn missing_objects_get_create_or_drop() {
        let t = missing_in_target(&users(), Some(WITHOUT_PHONE));
        assert_eq!(t.diff_count, 1);
        assert_eq!(t.repair_statements, vec![format!("{};", WITHOUT_PHONE)]);

        let s = missing_in_source(&users(), &SqliteDialect);
        assert_eq!(s.state, StructureState::MissingInSource);
        assert_eq!(s.repair_statements, vec![r#"DROP TABLE IF EXISTS "users";"#]);
    }
}
