pub mod model;

pub use model::{Direction, Operator, PartTree, QueryPart, Subject};

use crate::error::DynaQueryError;
use crate::metadata::EntityDescriptor;

const PREFIXES: &[(&str, Subject)] = &[
    ("findAll", Subject::FindAll),
    ("find", Subject::Find),
    ("count", Subject::Count),
    ("exists", Subject::Exists),
    ("delete", Subject::Delete),
    ("query", Subject::Query),
];

/// Splits a camelCase tail into its constituent capitalized words, e.g.
/// `"CustomerIdAndOrderDateBetween"` -> `["Customer","Id","And","Order",
/// "Date","Between"]`. Each new uppercase letter starts a word.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn pascal_case(property: &str) -> String {
    property
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Looks up the operator an exact (word-joined) suffix string denotes.
/// Returns `None` for an empty suffix, which the caller treats as EQ.
fn operator_for_suffix(suffix: &str) -> Result<Option<Operator>, String> {
    Ok(Some(match suffix {
        "" => return Ok(None),
        "Is" | "Equals" => Operator::Eq,
        "Not" => Operator::Ne,
        "In" => Operator::In,
        "Containing" | "Contains" => Operator::Contains,
        "NotContaining" => Operator::NotContains,
        "StartingWith" | "StartsWith" => Operator::BeginsWith,
        "Between" => Operator::Between,
        "After" | "GreaterThan" => Operator::Gt,
        "Before" | "LessThan" => Operator::Lt,
        "GreaterThanEqual" => Operator::Ge,
        "LessThanEqual" => Operator::Le,
        "IsNull" => Operator::IsNull,
        "IsNotNull" => Operator::IsNotNull,
        "True" => Operator::True,
        "False" => Operator::False,
        other => return Err(format!("unrecognized operator keyword {other:?}")),
    }))
}

/// Matches a sequence of words against the longest known property prefix,
/// per §4.B ("Property resolution tries the longest property name first").
/// Returns the matched property and the index of the first unconsumed word.
fn resolve_property<'a>(
    words: &[String],
    descriptor: &'a EntityDescriptor,
) -> Option<(&'a str, usize)> {
    let pascal_by_property: Vec<(&str, String)> = descriptor
        .properties
        .iter()
        .map(|p| (p.property, pascal_case(p.property)))
        .collect();

    for take in (1..=words.len()).rev() {
        let candidate: String = words[..take].concat();
        if let Some((property, _)) = pascal_by_property
            .iter()
            .find(|(_, pascal)| *pascal == candidate)
        {
            return Some((property, take));
        }
    }
    None
}

fn parse_segment(
    words: &[String],
    descriptor: &EntityDescriptor,
    method_name: &str,
) -> Result<QueryPart, DynaQueryError> {
    let (property, consumed) = resolve_property(words, descriptor).ok_or_else(|| {
        DynaQueryError::Parse {
            method_name: method_name.to_string(),
            message: format!("unknown property in segment {:?}", words.concat()),
        }
    })?;

    let mut suffix_words = words[consumed..].to_vec();
    let ignore_case_requested = if let Some(pos) = suffix_words
        .windows(2)
        .position(|w| w[0] == "Ignore" && w[1] == "Case")
    {
        suffix_words.drain(pos..pos + 2);
        true
    } else {
        false
    };

    let suffix: String = suffix_words.concat();
    let operator = operator_for_suffix(&suffix)
        .map_err(|message| DynaQueryError::Parse {
            method_name: method_name.to_string(),
            message,
        })?
        .unwrap_or(Operator::Eq);

    Ok(QueryPart {
        property,
        operator,
        ignore_case_requested,
    })
}

fn split_on(words: &[String], separator: &str) -> Result<Vec<Vec<String>>, String> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for word in words {
        if word == separator {
            if current.is_empty() {
                return Err(format!("empty segment before {separator}"));
            }
            segments.push(std::mem::take(&mut current));
        } else if word == "Or" {
            return Err("OR is not supported".to_string());
        } else {
            current.push(word.clone());
        }
    }
    if current.is_empty() {
        return Err(format!("empty segment after last {separator}"));
    }
    segments.push(current);
    Ok(segments)
}

fn parse_order_segment(
    words: &[String],
    descriptor: &EntityDescriptor,
    method_name: &str,
) -> Result<(&'static str, Direction), DynaQueryError> {
    let (direction_word, property_words) = words.split_last().ok_or_else(|| DynaQueryError::Parse {
        method_name: method_name.to_string(),
        message: "empty OrderBy segment".to_string(),
    })?;
    let direction = match direction_word.as_str() {
        "Asc" => Direction::Asc,
        "Desc" => Direction::Desc,
        other => {
            return Err(DynaQueryError::Parse {
                method_name: method_name.to_string(),
                message: format!("expected Asc/Desc, found {other:?}"),
            })
        }
    };
    let pascal: String = property_words.concat();
    let property = descriptor
        .properties
        .iter()
        .find(|p| pascal_case(p.property) == pascal)
        .map(|p| p.property)
        .ok_or_else(|| DynaQueryError::Parse {
            method_name: method_name.to_string(),
            message: format!("unknown sort property {pascal:?}"),
        })?;
    Ok((property, direction))
}

/// Parses a finder method name into a [`PartTree`] (§4.B).
pub fn parse(method_name: &str, descriptor: &EntityDescriptor) -> Result<PartTree, DynaQueryError> {
    let (subject, rest) = PREFIXES
        .iter()
        .find_map(|(prefix, subject)| {
            method_name
                .strip_prefix(prefix)
                .and_then(|r| r.strip_prefix("By"))
                .map(|r| (*subject, r))
        })
        .ok_or_else(|| DynaQueryError::Parse {
            method_name: method_name.to_string(),
            message: "method name must start with find/findAll/count/exists/delete/query, followed by By".to_string(),
        })?;

    let words = split_words(rest);

    let order_by_at = words
        .windows(2)
        .position(|w| w[0] == "Order" && w[1] == "By");

    let (predicate_words, order_words) = match order_by_at {
        Some(pos) => (&words[..pos], &words[pos + 2..]),
        None => (&words[..], &[][..]),
    };

    if predicate_words.is_empty() {
        return Err(DynaQueryError::Parse {
            method_name: method_name.to_string(),
            message: "no predicates found after By".to_string(),
        });
    }

    let segments = split_on(predicate_words, "And").map_err(|message| DynaQueryError::Parse {
        method_name: method_name.to_string(),
        message,
    })?;
    let parts = segments
        .iter()
        .map(|segment| parse_segment(segment, descriptor, method_name))
        .collect::<Result<Vec<_>, _>>()?;

    let sort = if order_words.is_empty() {
        Vec::new()
    } else {
        split_on(order_words, "And")
            .map_err(|message| DynaQueryError::Parse {
                method_name: method_name.to_string(),
                message,
            })?
            .iter()
            .map(|segment| parse_order_segment(segment, descriptor, method_name))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(PartTree { subject, parts, sort })
}
