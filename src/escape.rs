/// Database flavour that decides quoting rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    MySql,
    Sqlite,
}

/// Escape `value` for use inside a single-quoted literal.
///
/// MySQL follows `mysql_real_escape_string`: NUL, `\n`, `\r`, `\`, `'`, `"`
/// and Ctrl-Z get a backslash. SQLite only doubles single quotes.
pub fn escape_string(backend: Backend, value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);

    match backend {
        Backend::MySql => {
            for c in value.chars() {
                match c {
                    '\0' => out.push_str("\\0"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    '"' => out.push_str("\\\""),
                    '\x1a' => out.push_str("\\Z"),
                    c => out.push(c),
                }
            }
        }
        Backend::Sqlite => {
            for c in value.chars() {
                if c == '\'' {
                    out.push('\'');
                }
                out.push(c);
            }
        }
    }

    out
}

pub fn quote_string(backend: Backend, value: &str) -> String {
    format!("'{}'", escape_string(backend, value))
}

/// `NULL` for a missing value, a quoted literal otherwise.
pub fn quote_value(backend: Backend, value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_string(), |v| quote_string(backend, v))
}

/// Quote a table or column name. Dotted names (`db.table.column`) are quoted
/// per segment; `*` is left bare.
pub fn quote_identifier(backend: Backend, name: &str) -> String {
    let quote = match backend {
        Backend::MySql => '`',
        Backend::Sqlite => '"',
    };

    name.split('.')
        .map(|segment| {
            if segment == "*" {
                return segment.to_string();
            }
            let mut out = String::with_capacity(segment.len() + 2);
            out.push(quote);
            for c in segment.chars() {
                if c == quote {
                    out.push(quote);
                }
                out.push(c);
            }
            out.push(quote);
            out
        })
        .collect::<Vec<_>>()
        .join(".")
}
