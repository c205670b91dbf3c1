/// Formatting of report rows as a fixed-width table, as csv, or as json, with the fields selected
/// by a `--fmt` spec.  The spec is a comma-separated list of field names, aliases for lists of
/// field names, and control words.
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::io;

pub type Formatter<T> = fn(&T) -> String;

/// The fields a report can print.  `defaults` is used when there is no `--fmt`.

pub struct Formatters<T> {
    pub fields: HashMap<&'static str, Formatter<T>>,
    pub aliases: HashMap<&'static str, Vec<&'static str>>,
    pub defaults: &'static str,
}

const CONTROLS: [&str; 6] = ["csv", "csvnamed", "fixed", "json", "header", "noheader"];

/// If the spec asks for help, print help for the fields in `formatters` and return true.

pub fn maybe_help<T>(
    output: &mut dyn io::Write,
    fmt: &Option<String>,
    formatters: &Formatters<T>,
) -> Result<bool> {
    match fmt {
        Some(s) if s.starts_with("help") => {}
        _ => return Ok(false),
    }
    let mut fields = formatters.fields.keys().copied().collect::<Vec<&str>>();
    fields.sort();
    let mut aliases = formatters.aliases.iter().collect::<Vec<_>>();
    aliases.sort();

    writeln!(output, "Syntax:\n  --fmt=(field|alias|control),...")?;
    writeln!(output, "\nFields:")?;
    for f in fields {
        writeln!(output, "  {f}")?;
    }
    if !aliases.is_empty() {
        writeln!(output, "\nAliases:")?;
        for (name, fields) in aliases {
            writeln!(output, "  {name} --> {}", fields.join(","))?;
        }
    }
    writeln!(output, "\nDefaults:\n  {}", formatters.defaults)?;
    writeln!(output, "\nControl:")?;
    for c in CONTROLS {
        writeln!(output, "  {c}")?;
    }
    Ok(true)
}

#[derive(Debug, Default, PartialEq)]
pub struct FormatOptions {
    pub csv: bool,    // csv or csvnamed requested
    pub named: bool,  // csvnamed requested
    pub json: bool,   // json requested, and not csv
    pub header: bool, // fixed output without noheader, or csv with header
}

/// Resolve `spec` into the selected field names, in order, and the output options.  Unknown words
/// are errors, as is a spec that selects no fields.

pub fn parse_fields<'a, T>(
    spec: &'a str,
    formatters: &'a Formatters<T>,
) -> Result<(Vec<&'a str>, FormatOptions)> {
    let mut fields = vec![];
    let mut controls = vec![];
    for x in spec.split(',').map(|x| x.trim()).filter(|x| !x.is_empty()) {
        if let Some((name, _)) = formatters.fields.get_key_value(x) {
            fields.push(*name);
        } else if let Some(names) = formatters.aliases.get(x) {
            fields.extend(names.iter().copied());
        } else if CONTROLS.contains(&x) {
            controls.push(x);
        } else {
            bail!("Unknown field or control word `{x}`, try --fmt=help");
        }
    }
    if fields.is_empty() {
        bail!("No output fields were selected")
    }
    Ok((fields, standard_options(&controls)))
}

pub fn standard_options(controls: &[&str]) -> FormatOptions {
    let has = |w: &str| controls.contains(&w);
    let named = has("csvnamed");
    let csv = has("csv") || named;
    let json = has("json") && !csv;
    // json never gets a header, csv only on request.
    let header = (!csv && !json && !has("noheader")) || (csv && has("header"));
    FormatOptions {
        csv,
        named,
        json,
        header,
    }
}

/// Apply the named `fields` of `formatters` to every row of `data` and print the result.  Write
/// errors on stdout are common in broken pipelines, the caller may choose to ignore them.

pub fn format_data<T>(
    output: &mut dyn io::Write,
    fields: &[&str],
    formatters: &Formatters<T>,
    opts: &FormatOptions,
    data: &[T],
) -> Result<()> {
    let mut fns = vec![];
    for f in fields {
        match formatters.fields.get(*f) {
            Some(fmt) => fns.push(*fmt),
            None => bail!("No formatter for field `{f}`"),
        }
    }
    let rows = data
        .iter()
        .map(|d| fns.iter().map(|f| f(d)).collect::<Vec<String>>())
        .collect::<Vec<Vec<String>>>();

    if opts.csv {
        format_csv(output, fields, opts, &rows)
    } else if opts.json {
        format_json(output, fields, &rows)
    } else {
        format_fixed_width(output, fields, opts, &rows)
    }
}

fn format_fixed_width(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    rows: &[Vec<String>],
) -> Result<()> {
    // Column width is the max across the column, header included.  Numbers would look better
    // right-aligned but the columns are strings by now.
    let mut widths = vec![0; fields.len()];
    if opts.header {
        for (w, f) in widths.iter_mut().zip(fields) {
            *w = f.len();
        }
    }
    for row in rows {
        for (w, v) in widths.iter_mut().zip(row) {
            *w = usize::max(*w, v.len());
        }
    }

    if opts.header {
        output.write_all(fixed_line(fields.iter().copied(), &widths).as_bytes())?;
    }
    for row in rows {
        output.write_all(fixed_line(row.iter().map(|v| v.as_str()), &widths).as_bytes())?;
    }
    Ok(())
}

fn fixed_line<'a>(vals: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut s = "".to_string();
    for (v, w) in vals.zip(widths) {
        s += &format!("{:w$}  ", v, w = *w);
    }
    s.trim_end().to_string() + "\n"
}

fn format_csv(
    output: &mut dyn io::Write,
    fields: &[&str],
    opts: &FormatOptions,
    rows: &[Vec<String>],
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);
    if opts.header {
        writer.write_record(fields)?;
    }
    for row in rows {
        if opts.named {
            writer.write_record(
                fields
                    .iter()
                    .zip(row)
                    .map(|(f, v)| format!("{f}={v}")),
            )?;
        } else {
            writer.write_record(row)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn format_json(output: &mut dyn io::Write, fields: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut objects = json::JsonValue::new_array();
    for row in rows {
        let mut obj = json::JsonValue::new_object();
        for (f, v) in fields.iter().zip(row) {
            obj[*f] = v.as_str().into();
        }
        objects.push(obj)?;
    }
    output.write_all(json::stringify(objects).as_bytes())?;
    output.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
struct Pair {
    name: String,
    n: u64,
}

#[cfg(test)]
fn pair_formatters() -> Formatters<Pair> {
    let mut fields: HashMap<&'static str, Formatter<Pair>> = HashMap::new();
    fields.insert("name", |p| p.name.clone());
    fields.insert("n", |p| p.n.to_string());
    let mut aliases = HashMap::new();
    aliases.insert("all", vec!["name", "n"]);
    Formatters {
        fields,
        aliases,
        defaults: "all",
    }
}

#[cfg(test)]
fn render(spec: &str) -> String {
    let data = vec![
        Pair {
            name: "selma".to_string(),
            n: 200,
        },
        Pair {
            name: "patty".to_string(),
            n: 52,
        },
    ];
    let fs = pair_formatters();
    let (fields, opts) = parse_fields(spec, &fs).unwrap();
    let mut out = vec![];
    format_data(&mut out, &fields, &fs, &opts, &data).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_format_fixed() {
    assert!(render("all") == "name   n\nselma  200\npatty  52\n");
    assert!(render("n,noheader") == "200\n52\n");
}

#[test]
fn test_format_csv_json() {
    assert!(render("name,n,csv") == "selma,200\npatty,52\n");
    assert!(render("all,csv,header") == "name,n\nselma,200\npatty,52\n");
    assert!(render("n,csvnamed") == "n=200\nn=52\n");
    assert!(
        render("all,json")
            == "[{\"name\":\"selma\",\"n\":\"200\"},{\"name\":\"patty\",\"n\":\"52\"}]\n"
    );
}

#[test]
fn test_parse_fields_errors() {
    let fs = pair_formatters();
    assert!(parse_fields("csv", &fs).is_err());
    assert!(parse_fields("name,bogus", &fs).is_err());
    let (fields, opts) = parse_fields("n,name", &fs).unwrap();
    assert!(fields == vec!["n", "name"]);
    assert!(opts.header && !opts.csv && !opts.json);
}

#[test]
fn test_maybe_help() {
    let fs = pair_formatters();
    let mut out = vec![];
    assert!(!maybe_help(&mut out, &Some("all".to_string()), &fs).unwrap());
    assert!(!maybe_help(&mut out, &None, &fs).unwrap());
    assert!(out.is_empty());
    assert!(maybe_help(&mut out, &Some("help".to_string()), &fs).unwrap());
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("\nFields:\n  n\n  name\n"));
    assert!(text.contains("  all --> name,n\n"));
}
