use std::collections::HashMap;

use anyhow::bail;

use crate::translate::slug;

/// Logical fields an import file can carry. Column headers map onto these
/// through an alias table so differently-formatted exports all resolve to
/// the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    StudentId,
    Course,
    Section,
    Subject,
    Date,
    Kind,
    Score,
    Status,
    Comment,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::StudentId => "studentId",
            Field::Course => "course",
            Field::Section => "section",
            Field::Subject => "subject",
            Field::Date => "date",
            Field::Kind => "kind",
            Field::Score => "score",
            Field::Status => "status",
            Field::Comment => "comment",
        }
    }
}

/// Header-name → logical-field table. Lookups are case- and
/// accent-insensitive (keys are slugged on both sides).
pub struct AliasTable {
    by_key: HashMap<String, Field>,
}

impl AliasTable {
    pub fn new() -> AliasTable {
        AliasTable {
            by_key: HashMap::new(),
        }
    }

    pub fn register(&mut self, field: Field, aliases: &[&str]) {
        for a in aliases {
            self.by_key.insert(slug(a), field);
        }
    }

    /// The header spellings the source systems actually produce.
    pub fn spanish_default() -> AliasTable {
        let mut t = AliasTable::new();
        t.register(Field::Name, &["nombre", "name"]);
        t.register(Field::StudentId, &["rut", "studentid", "id"]);
        t.register(Field::Course, &["curso", "course", "courseid"]);
        t.register(Field::Section, &["seccion", "sección", "section", "sectionid"]);
        t.register(Field::Subject, &["asignatura", "subject", "subjectid"]);
        t.register(Field::Date, &["fecha", "gradedat", "date"]);
        t.register(Field::Kind, &["tipo", "type"]);
        t.register(Field::Score, &["nota", "score"]);
        t.register(Field::Status, &["estado", "status"]);
        t.register(Field::Comment, &["comentario", "comment"]);
        t
    }

    pub fn resolve(&self, header: &str) -> Option<Field> {
        self.by_key.get(&slug(header)).copied()
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    /// 1-based position among data rows (the header is row 0).
    pub row_index: usize,
    pub fields: Vec<String>,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

fn end_record(records: &mut Vec<(Vec<String>, String)>, fields: &mut Vec<String>, cur: &mut String, raw: &mut String) {
    // A line with no separators and no content is blank; skip it.
    if fields.is_empty() && cur.trim().is_empty() {
        cur.clear();
        raw.clear();
        return;
    }
    fields.push(std::mem::take(cur));
    records.push((std::mem::take(fields), std::mem::take(raw)));
}

/// Splits raw delimited text into a header row and padded data rows.
///
/// Quoting: a double quote toggles quoted state, a comma inside quotes is
/// literal, `""` inside quotes is an escaped quote. An unterminated quote
/// extends to the end of input; only the record it started in is affected.
/// Rows shorter than the header are padded with empty strings so they can be
/// flagged invalid downstream instead of failing here.
pub fn parse(text: &str) -> anyhow::Result<Table> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut records: Vec<(Vec<String>, String)> = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut raw = String::new();
    let mut in_quotes = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cur.push('"');
                    raw.push_str("\"\"");
                } else {
                    in_quotes = false;
                    raw.push('"');
                }
            } else {
                cur.push(c);
                raw.push(c);
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                raw.push('"');
            }
            ',' => {
                fields.push(std::mem::take(&mut cur));
                raw.push(',');
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                end_record(&mut records, &mut fields, &mut cur, &mut raw);
            }
            '\n' => {
                end_record(&mut records, &mut fields, &mut cur, &mut raw);
            }
            _ => {
                cur.push(c);
                raw.push(c);
            }
        }
    }
    end_record(&mut records, &mut fields, &mut cur, &mut raw);

    if records.is_empty() {
        bail!("import text is empty");
    }

    let mut it = records.into_iter();
    let (header_fields, _) = it.next().unwrap_or_default();
    let headers: Vec<String> = header_fields.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for (i, (mut row_fields, row_raw)) in it.enumerate() {
        while row_fields.len() < headers.len() {
            row_fields.push(String::new());
        }
        rows.push(Row {
            row_index: i + 1,
            fields: row_fields,
            raw: row_raw,
        });
    }

    Ok(Table { headers, rows })
}

/// Maps each logical field to its column position. The first matching
/// column wins when a file repeats a header.
pub fn resolve_headers(headers: &[String], aliases: &AliasTable) -> HashMap<Field, usize> {
    let mut columns = HashMap::new();
    for (i, h) in headers.iter().enumerate() {
        if let Some(f) = aliases.resolve(h) {
            columns.entry(f).or_insert(i);
        }
    }
    columns
}
