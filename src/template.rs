//! Format-string templates with a fixed set of named substitution points.
//!
//! A template is parsed once, when the configuration is loaded, against the
//! keys its [`TemplateKind`] allows. Rendering a parsed template can then only
//! fail if the caller forgets to bind a key.

use std::fmt::{self, Write};

use chrono::{
    format::{Item, StrftimeItems},
    NaiveDateTime,
};
use thiserror::Error;

/// Default rendering of a time value when the placeholder has no spec.
const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown key `{key}` (allowed: {allowed})")]
    UnknownKey { key: String, allowed: String },
    #[error("unclosed `{{` at byte {0}")]
    Unclosed(usize),
    #[error("unmatched `}}` at byte {0}")]
    Unmatched(usize),
    #[error("invalid format spec `{spec}` for key `{key}`")]
    BadSpec { key: &'static str, spec: String },
    #[error("no value bound for key `{0}`")]
    Unbound(&'static str),
}

/// Named substitution points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    FcstInit,
    FcstValid,
    FcstHour,
    FcstDay,
    Model,
    Variable,
    Source,
}

impl Key {
    pub fn name(self) -> &'static str {
        match self {
            Key::FcstInit => "fcst_init",
            Key::FcstValid => "fcst_valid",
            Key::FcstHour => "fcst_hour",
            Key::FcstDay => "fcst_day",
            Key::Model => "model",
            Key::Variable => "variable",
            Key::Source => "source",
        }
    }

    fn class(self) -> Class {
        match self {
            Key::FcstInit | Key::FcstValid | Key::FcstDay => Class::Time,
            Key::FcstHour => Class::Int,
            Key::Model | Key::Variable | Key::Source => Class::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Time,
    Int,
    Text,
}

/// What a template is used for, which fixes the keys it may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Url,
    TargetDir,
    CopyDir,
    CopyFile,
}

impl TemplateKind {
    pub fn keys(self) -> &'static [Key] {
        match self {
            TemplateKind::Url => &[
                Key::FcstInit,
                Key::FcstValid,
                Key::FcstHour,
                Key::Model,
                Key::Variable,
            ],
            TemplateKind::TargetDir => &[Key::FcstDay, Key::Source],
            TemplateKind::CopyDir => &[Key::FcstDay],
            TemplateKind::CopyFile => &[Key::FcstDay, Key::FcstHour],
        }
    }

    fn allowed(self) -> String {
        self.keys()
            .iter()
            .map(|k| k.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Spec {
    Time(String),
    Int { width: usize, zero: bool },
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field { key: Key, spec: Spec },
}

/// A parsed, validated template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

/// A value bound to a key at render time.
#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    Time(NaiveDateTime),
    Int(i64),
    Text(&'a str),
}

/// Key bindings for one render call.
#[derive(Debug, Default)]
pub struct Vars<'a> {
    bound: Vec<(Key, Value<'a>)>,
}

impl<'a> Vars<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(mut self, key: Key, t: NaiveDateTime) -> Self {
        self.bound.push((key, Value::Time(t)));
        self
    }

    pub fn int(mut self, key: Key, n: i64) -> Self {
        self.bound.push((key, Value::Int(n)));
        self
    }

    pub fn text(mut self, key: Key, s: &'a str) -> Self {
        self.bound.push((key, Value::Text(s)));
        self
    }

    fn get(&self, key: Key) -> Option<Value<'a>> {
        self.bound.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

impl Template {
    pub fn parse(source: &str, kind: TemplateKind) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::Unmatched(pos)),
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed(pos));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_field(&body, kind)?);
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template {
            source: source.to_string(),
            segments,
        })
    }

    pub fn render(&self, vars: &Vars<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Field { key, spec } => {
                    let value = vars.get(*key).ok_or(TemplateError::Unbound(key.name()))?;
                    write_value(&mut out, value, spec).map_err(|_| TemplateError::BadSpec {
                        key: key.name(),
                        spec: format!("{spec:?}"),
                    })?;
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(body: &str, kind: TemplateKind) -> Result<Segment, TemplateError> {
    let (name, spec) = match body.split_once(':') {
        Some((name, spec)) => (name.trim(), Some(spec)),
        None => (body.trim(), None),
    };

    let key = kind
        .keys()
        .iter()
        .copied()
        .find(|k| k.name() == name)
        .ok_or_else(|| TemplateError::UnknownKey {
            key: name.to_string(),
            allowed: kind.allowed(),
        })?;

    let bad_spec = || TemplateError::BadSpec {
        key: key.name(),
        spec: spec.unwrap_or_default().to_string(),
    };

    let spec = match (key.class(), spec) {
        (Class::Time, None) => Spec::Time(DEFAULT_TIME_FORMAT.to_string()),
        (Class::Time, Some(s)) => {
            if s.is_empty() || StrftimeItems::new(s).any(|item| matches!(item, Item::Error)) {
                return Err(bad_spec());
            }
            Spec::Time(s.to_string())
        }
        (Class::Int, None) => Spec::Int { width: 0, zero: false },
        (Class::Int, Some(s)) => parse_int_spec(s).ok_or_else(bad_spec)?,
        (Class::Text, None) => Spec::Plain,
        (Class::Text, Some(_)) => return Err(bad_spec()),
    };

    Ok(Segment::Field { key, spec })
}

/// Accepts `d`, `Nd` and `0Nd`.
fn parse_int_spec(s: &str) -> Option<Spec> {
    let digits = s.strip_suffix('d')?;
    if digits.is_empty() {
        return Some(Spec::Int { width: 0, zero: false });
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let zero = digits.len() > 1 && digits.starts_with('0');
    let width = digits.parse().ok()?;
    Some(Spec::Int { width, zero })
}

fn write_value(out: &mut String, value: Value<'_>, spec: &Spec) -> fmt::Result {
    match (value, spec) {
        (Value::Time(t), Spec::Time(fmt)) => write!(out, "{}", t.format(fmt)),
        (Value::Int(n), &Spec::Int { width, zero }) => {
            if zero {
                write!(out, "{n:0width$}")
            } else {
                write!(out, "{n:width$}")
            }
        }
        (Value::Text(s), Spec::Plain) => {
            out.push_str(s);
            Ok(())
        }
        _ => Err(fmt::Error),
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn init() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn should_render_url_template() {
        let t = Template::parse(
            "https://x/{model}/{fcst_init:%Y/%m/%d/%H}/{model}_{variable}_{fcst_init:%Y%m%d%H}_{fcst_hour:03d}.jpg",
            TemplateKind::Url,
        )
        .unwrap();
        let vars = Vars::new()
            .time(Key::FcstInit, init())
            .int(Key::FcstHour, 6)
            .text(Key::Model, "harmonie")
            .text(Key::Variable, "mslp");

        assert_eq!(
            t.render(&vars).unwrap(),
            "https://x/harmonie/2024/01/01/00/harmonie_mslp_2024010100_006.jpg"
        );
    }

    #[test]
    fn should_use_default_time_format() {
        let t = Template::parse("{fcst_day}", TemplateKind::CopyDir).unwrap();
        let vars = Vars::new().time(Key::FcstDay, init());
        assert_eq!(t.render(&vars).unwrap(), "2024-01-01 00:00:00");
    }

    #[test]
    fn should_pad_integers() {
        let t = Template::parse("{fcst_hour:3d}|{fcst_hour:d}|{fcst_hour}", TemplateKind::CopyFile)
            .unwrap();
        let vars = Vars::new().int(Key::FcstHour, 12);
        assert_eq!(t.render(&vars).unwrap(), " 12|12|12");
    }

    #[test]
    fn should_keep_escaped_braces() {
        let t = Template::parse("{{literal}}/{source}", TemplateKind::TargetDir).unwrap();
        let vars = Vars::new().text(Key::Source, "META");
        assert_eq!(t.render(&vars).unwrap(), "{literal}/META");
    }

    #[test]
    fn should_reject_key_outside_kind() {
        let err = Template::parse("{fcst_hour}", TemplateKind::TargetDir).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownKey { ref key, .. } if key == "fcst_hour"));

        let err = Template::parse("{top_url}/x", TemplateKind::Url).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownKey { .. }));
    }

    #[test]
    fn should_reject_bad_specs() {
        assert!(matches!(
            Template::parse("{fcst_init:%Q}", TemplateKind::Url),
            Err(TemplateError::BadSpec { .. })
        ));
        assert!(matches!(
            Template::parse("{fcst_hour:x}", TemplateKind::Url),
            Err(TemplateError::BadSpec { .. })
        ));
        assert!(matches!(
            Template::parse("{model:>5}", TemplateKind::Url),
            Err(TemplateError::BadSpec { .. })
        ));
    }

    #[test]
    fn should_reject_unbalanced_braces() {
        assert_eq!(
            Template::parse("abc{model", TemplateKind::Url),
            Err(TemplateError::Unclosed(3))
        );
        assert_eq!(
            Template::parse("abc}", TemplateKind::Url),
            Err(TemplateError::Unmatched(3))
        );
    }

    #[test]
    fn should_report_unbound_key() {
        let t = Template::parse("{source}", TemplateKind::TargetDir).unwrap();
        assert_eq!(t.render(&Vars::new()), Err(TemplateError::Unbound("source")));
    }
}
