use anyhow::Result;
use serde_json::Value as JsonValue;
use std::io::{self, Write};

#[derive(Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Yaml,
    Json,
    Raw,
}

pub fn emit_data(fmt: &OutputFormat, data: &JsonValue) -> Result<()> {
    let mut out = io::stdout().lock();
    write_data(&mut out, fmt, data)?;
    out.flush()?;
    Ok(())
}

pub fn write_data<W: Write>(w: &mut W, fmt: &OutputFormat, data: &JsonValue) -> Result<()> {
    match fmt {
        OutputFormat::Yaml => {
            let s = serde_yaml::to_string(data)?;
            writeln!(w, "{}", s.trim_end())?;
        }
        OutputFormat::Json => {
            let s = serde_json::to_string_pretty(data)?;
            writeln!(w, "{}", s)?;
        }
        OutputFormat::Raw => match data {
            JsonValue::Array(items) => {
                for item in items {
                    writeln!(w, "{}", raw_scalar(item)?)?;
                }
            }
            other => writeln!(w, "{}", raw_scalar(other)?)?,
        },
    }
    Ok(())
}

fn raw_scalar(v: &JsonValue) -> Result<String> {
    Ok(match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => serde_json::to_string(other)?,
    })
}

pub fn error_value(err: &anyhow::Error) -> JsonValue {
    let mut map = serde_json::Map::new();
    map.insert("error".into(), JsonValue::String(err.to_string()));
    let causes: Vec<JsonValue> = err
        .chain()
        .skip(1)
        .map(|c| JsonValue::String(c.to_string()))
        .collect();
    if !causes.is_empty() {
        map.insert("causes".into(), JsonValue::Array(causes));
    }
    JsonValue::Object(map)
}

pub fn write_error<W: Write>(w: &mut W, err: &anyhow::Error) -> Result<()> {
    let s = serde_yaml::to_string(&error_value(err))?;
    writeln!(w, "{}", s.trim_end())?;
    Ok(())
}

pub fn emit_error(err: &anyhow::Error) -> Result<()> {
    let _ = write_error(&mut io::stderr(), err);
    Ok(())
}
