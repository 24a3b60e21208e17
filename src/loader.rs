//! Loads type declarations written in the schema language (see `schema.pest`)
//! into a [`SchemaBuilder`]. Adapters cannot be written in the language; add
//! them to the returned builder through [`SchemaBuilder::type_mut`] before
//! building the catalog.

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest_derive::Parser;
use serde_json::{Number, Value};
use tracing::debug;

use crate::datatype::{AttributeRule, AttributeType};
use crate::error::{DomError, Result};
use crate::property::PropertyAnnotation;
use crate::schema::{AttributeSpec, SchemaBuilder, TypeSpec};

#[derive(Parser)]
#[grammar = "schema.pest"]
struct SchemaParser;

/// Parses `source` into a fresh builder.
pub fn load_schema(source: &str) -> Result<SchemaBuilder> {
    let mut builder = SchemaBuilder::new();
    parse_into(&mut builder, source)?;
    Ok(builder)
}

/// Adds the types declared in `source` to an existing builder, so a schema
/// can be spread over several sources.
pub fn parse_into(builder: &mut SchemaBuilder, source: &str) -> Result<()> {
    let mut pairs = SchemaParser::parse(Rule::schema, source).map_err(|e| {
        let (line, col) = match e.line_col {
            LineColLocation::Pos((line, col)) => (line, col),
            LineColLocation::Span((line, col), _) => (line, col),
        };
        DomError::Parse { message: e.variant.message().to_string(), line: Some(line), col: Some(col) }
    })?;
    let Some(schema) = pairs.next() else {
        return Ok(());
    };
    let mut count = 0;
    for type_decl in schema.into_inner().filter(|p| p.as_rule() == Rule::type_decl) {
        parse_type(builder, type_decl)?;
        count += 1;
    }
    debug!(types = count, "schema source loaded");
    Ok(())
}

fn error_at(pair: &Pair<Rule>, message: String) -> DomError {
    let (line, col) = pair.line_col();
    DomError::Parse { message, line: Some(line), col: Some(col) }
}

fn parse_type(builder: &mut SchemaBuilder, pair: Pair<Rule>) -> Result<()> {
    let position = pair.clone();
    let mut inner = pair.into_inner().peekable();
    let is_abstract = inner.next_if(|p| p.as_rule() == Rule::abstract_flag).is_some();
    let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
    let spec = builder.define_type(&name).map_err(|e| error_at(&position, e.to_string()))?;
    if is_abstract {
        spec.set_abstract();
    }
    for member in inner {
        match member.as_rule() {
            Rule::base_name => {
                spec.base(member.as_str().trim());
            }
            Rule::attribute_decl => parse_attribute(spec, member)?,
            Rule::child_decl => {
                let mut parts = member.into_inner();
                let child = parts.next().map(|p| p.as_str()).unwrap_or_default();
                let target = parts.next().map(|p| p.as_str()).unwrap_or_default();
                if parts.next().is_some() {
                    spec.child_list(child, target);
                } else {
                    spec.child(child, target);
                }
            }
            Rule::id_decl => {
                if let Some(id) = member.into_inner().next() {
                    spec.id_attribute(id.as_str());
                }
            }
            Rule::property_decl => {
                spec.property(parse_property(member));
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_attribute(spec: &mut TypeSpec, pair: Pair<Rule>) -> Result<()> {
    let position = pair.clone();
    let mut inner = pair.into_inner();
    let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
    let type_pair = inner
        .next()
        .ok_or_else(|| error_at(&position, format!("attribute '{}' has no type", name)))?;
    let value_type = AttributeType::from_name(type_pair.as_str())
        .ok_or_else(|| error_at(&type_pair, format!("unknown attribute type '{}'", type_pair.as_str())))?;
    let mut attribute = AttributeSpec::new(&name, value_type);
    for part in inner {
        match part.as_rule() {
            Rule::range_rule => {
                let (min, max) = bounds(&part)?;
                attribute = attribute.with_rule(AttributeRule::Range { min, max });
            }
            Rule::length_rule => {
                let (min, max) = bounds(&part)?;
                let (min, max) = (min.map(|m| m as usize), max.map(|m| m as usize));
                attribute = attribute.with_rule(AttributeRule::Length { min, max });
            }
            Rule::pattern_rule => {
                let pattern = part.clone().into_inner().next().map(|s| unescape(&s)).unwrap_or_default();
                let rule = AttributeRule::pattern(&pattern).map_err(|e| error_at(&part, e.to_string()))?;
                attribute = attribute.with_rule(rule);
            }
            Rule::oneof_rule => {
                let options = part.into_inner().map(|s| unescape(&s)).collect();
                attribute = attribute.with_rule(AttributeRule::OneOf(options));
            }
            _ => {
                let default = value_type
                    .from_json(&literal(&part)?)
                    .map_err(|e| error_at(&part, format!("default of attribute '{}': {}", name, e)))?;
                attribute = attribute.with_default(default);
            }
        }
    }
    spec.attribute_spec(attribute);
    Ok(())
}

fn bounds(pair: &Pair<Rule>) -> Result<(Option<f64>, Option<f64>)> {
    let mut values = Vec::with_capacity(2);
    for bound in pair.clone().into_inner() {
        let value = match bound.as_str().trim() {
            "" => None,
            text => Some(text.parse::<f64>().map_err(|_| error_at(&bound, format!("bad bound '{}'", text)))?),
        };
        values.push(value);
    }
    Ok((values.first().copied().flatten(), values.get(1).copied().flatten()))
}

/// The JSON form of a literal, which every attribute type knows how to read.
fn literal(pair: &Pair<Rule>) -> Result<Value> {
    let value = match pair.as_rule() {
        Rule::null => Value::Null,
        Rule::boolean => Value::Bool(pair.as_str() == "true"),
        Rule::string => Value::String(unescape(pair)),
        Rule::number => {
            let text = pair.as_str();
            match text.parse::<i64>() {
                Ok(i) => Value::Number(Number::from(i)),
                Err(_) => text
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| error_at(pair, format!("bad number '{}'", text)))?,
            }
        }
        Rule::array => Value::Array(pair.clone().into_inner().map(|p| literal(&p)).collect::<Result<_>>()?),
        _ => return Err(error_at(pair, format!("unexpected '{}'", pair.as_str()))),
    };
    Ok(value)
}

fn unescape(string: &Pair<Rule>) -> String {
    let raw = string.clone().into_inner().next().map(|p| p.as_str()).unwrap_or_default();
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some(other) => text.push(other),
            None => {}
        }
    }
    text
}

fn parse_property(pair: Pair<Rule>) -> PropertyAnnotation {
    let mut inner = pair.into_inner();
    let path = inner.next().map(|p| p.as_str()).unwrap_or_default();
    let mut annotation = PropertyAnnotation::new(path);
    for option in inner {
        let text = || option.clone().into_inner().next().map(|s| unescape(&s)).unwrap_or_default();
        annotation = match option.as_rule() {
            Rule::display_option => annotation.display_name(&text()),
            Rule::category_option => annotation.category(&text()),
            Rule::description_option => annotation.description(&text()),
            Rule::readonly_option => annotation.read_only(),
            _ => annotation,
        };
    }
    annotation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_position_of_syntax_errors() {
        let source = "type State {\n  attribute size float;\n}";
        match load_schema(source) {
            Err(DomError::Parse { line, .. }) => assert_eq!(line, Some(2)),
            other => panic!("expected a parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unescapes_strings() {
        let source = r#"type Note { attribute text: string = "say \"hi\""; }"#;
        let catalog = load_schema(source).unwrap().build().unwrap();
        let def = catalog.node_type("Note").unwrap().attribute_definition("text").unwrap();
        assert_eq!(def.default_value().as_str(), Some("say \"hi\""));
    }
}
