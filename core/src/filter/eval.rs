use std::cmp::Ordering;

use super::condition::{Condition, Operator};
use crate::db::values::{Record, Value};

/// Field access for anything the evaluator can test.
pub trait Fields {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl Fields for Record {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl<T: Fields + ?Sized> Fields for &T {
    fn field(&self, name: &str) -> Option<&Value> {
        (**self).field(name)
    }
}

/// `None` matches everything.
pub fn evaluate<E: Fields + ?Sized>(entity: &E, condition: Option<&Condition>) -> bool {
    condition.map_or(true, |c| matches(entity, c))
}

pub fn matches<E: Fields + ?Sized>(entity: &E, condition: &Condition) -> bool {
    match condition {
        Condition::Field { field, op, value } => {
            leaf(entity.field(field).unwrap_or(&Value::Null), *op, value)
        }
        Condition::And(children) | Condition::All(children) => {
            children.iter().all(|c| matches(entity, c))
        }
        Condition::Or(children) => children.iter().any(|c| matches(entity, c)),
        Condition::Not(inner) => !matches(entity, inner),
        Condition::Match(fields) => fields
            .iter()
            .all(|(k, v)| leaf(entity.field(k).unwrap_or(&Value::Null), Operator::Equal, v)),
        // `false` matching everything is long-standing behaviour callers rely on.
        Condition::Literal(_) => true,
    }
}

fn ordered(actual: &Value, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    actual.compare(expected).is_some_and(accept)
}

/// Leaf semantics shared with the SQL translation.
pub fn leaf(actual: &Value, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::Equal => actual.loose_eq(expected),
        Operator::NotEqual => !actual.loose_eq(expected),
        Operator::LessThan => ordered(actual, expected, Ordering::is_lt),
        Operator::LessThanOrEqual => ordered(actual, expected, Ordering::is_le),
        Operator::GreaterThan => ordered(actual, expected, Ordering::is_gt),
        Operator::GreaterThanOrEqual => ordered(actual, expected, Ordering::is_ge),
        Operator::AnyOf => match expected {
            Value::List(options) => options.iter().any(|o| actual.loose_eq(o)),
            single => actual.loose_eq(single),
        },
        Operator::Contains => actual.contains(expected),
        Operator::StartsWith => match (actual, expected) {
            (Value::Text(a), Value::Text(e)) => a.starts_with(e.as_str()),
            _ => false,
        },
        Operator::EndsWith => match (actual, expected) {
            (Value::Text(a), Value::Text(e)) => a.ends_with(e.as_str()),
            _ => false,
        },
        Operator::MinLength => match (actual.length(), expected.as_i64()) {
            (Some(len), Some(min)) => len as i64 >= min,
            _ => false,
        },
        Operator::MaxLength => match (actual.length(), expected.as_i64()) {
            (Some(len), Some(max)) => len as i64 <= max,
            _ => false,
        },
        Operator::Truthy => {
            let want = expected.is_null() || expected.is_truthy();
            actual.is_truthy() == want
        }
        Operator::IsNull => actual.is_null(),
        Operator::IsNotNull => !actual.is_null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn round() -> Record {
        record! {
            "id" => "r1",
            "course" => "Pine Nursery",
            "strokes" => 84,
            "tags" => vec![Value::from("windy"), Value::from("walking")],
            "notes" => "",
            "finished" => true,
        }
    }

    #[test]
    fn test_absent_and_literal_conditions_match() {
        let r = round();
        assert!(evaluate(&r, None));
        assert!(evaluate(&r, Some(&Condition::Literal(true))));
        assert!(evaluate(&r, Some(&Condition::Literal(false))));
    }

    #[test]
    fn test_comparisons() {
        let r = round();
        assert!(matches(&r, &Condition::eq("strokes", 84.0)));
        assert!(matches(&r, &Condition::ne("strokes", 85)));
        assert!(matches(&r, &Condition::lt("strokes", 90)));
        assert!(matches(&r, &Condition::lte("strokes", 84)));
        assert!(!matches(&r, &Condition::gt("strokes", 84)));
        assert!(matches(&r, &Condition::gte("course", "Pine")));
        assert!(!matches(&r, &Condition::lt("missing", 1)));
        assert!(!matches(&r, &Condition::lt("course", 1)));
        assert!(matches(&r, &Condition::eq("missing", Value::Null)));
        assert!(matches(&r, &Condition::ne("missing", 3)));
    }

    #[test]
    fn test_text_and_list_operators() {
        let r = round();
        assert!(matches(&r, &Condition::leaf("course", Operator::Contains, "Nurs")));
        assert!(!matches(&r, &Condition::leaf("course", Operator::Contains, "nurs")));
        assert!(matches(&r, &Condition::leaf("tags", Operator::Contains, "windy")));
        assert!(matches(&r, &Condition::leaf("course", Operator::StartsWith, "Pine")));
        assert!(matches(&r, &Condition::leaf("course", Operator::EndsWith, "Nursery")));
        assert!(!matches(&r, &Condition::leaf("strokes", Operator::StartsWith, "8")));
        assert!(matches(&r, &Condition::leaf("course", Operator::MinLength, 12)));
        assert!(!matches(&r, &Condition::leaf("course", Operator::MaxLength, 11)));
        assert!(matches(&r, &Condition::leaf("tags", Operator::MaxLength, 2)));
        assert!(matches(&r, &Condition::any_of("strokes", [80, 84, 90])));
        assert!(!matches(&r, &Condition::any_of("strokes", [80, 90])));
    }

    #[test]
    fn test_truthy_and_nulls() {
        let r = round();
        assert!(matches(&r, &Condition::leaf("finished", Operator::Truthy, true)));
        assert!(matches(&r, &Condition::leaf("notes", Operator::Truthy, false)));
        assert!(matches(&r, &Condition::leaf("missing", Operator::Truthy, false)));
        assert!(matches(&r, &Condition::is_null("missing")));
        assert!(matches(&r, &Condition::is_not_null("notes")));
    }

    #[test]
    fn test_single_element_list_equals_condition() {
        let r = round();
        let conditions = [
            Condition::eq("strokes", 84),
            Condition::eq("strokes", 85),
            Condition::leaf("course", Operator::Contains, "Pine"),
            Condition::is_null("notes"),
            Condition::Literal(false),
            Condition::or([]),
        ];
        for c in conditions {
            assert_eq!(
                matches(&r, &Condition::All(vec![c.clone()])),
                matches(&r, &c),
                "{c:?}"
            );
        }
    }

    #[test]
    fn test_boolean_algebra() {
        let r = round();
        let leaves = [
            Condition::eq("strokes", 84),
            Condition::gt("strokes", 90),
            Condition::leaf("course", Operator::StartsWith, "Pine"),
            Condition::is_null("course"),
        ];
        for a in &leaves {
            for b in &leaves {
                let ab = Condition::and([a.clone(), b.clone()]);
                let ba = Condition::and([b.clone(), a.clone()]);
                assert_eq!(matches(&r, &ab), matches(&r, &ba));

                let not_ab = ab.clone().negate();
                let or_not = Condition::or([a.clone().negate(), b.clone().negate()]);
                assert_eq!(matches(&r, &not_ab), matches(&r, &or_not));

                for c in &leaves {
                    let left = Condition::and([ab.clone(), c.clone()]);
                    let right = Condition::and([a.clone(), Condition::and([b.clone(), c.clone()])]);
                    assert_eq!(matches(&r, &left), matches(&r, &right));
                }
            }
        }
    }

    #[test]
    fn test_match_shorthand() {
        let r = round();
        assert!(matches(&r, &Condition::Match(record! { "id" => "r1", "strokes" => 84 })));
        assert!(!matches(&r, &Condition::Match(record! { "id" => "r1", "strokes" => 85 })));
        assert!(matches(&r, &Condition::Match(Record::new())));
    }
}
