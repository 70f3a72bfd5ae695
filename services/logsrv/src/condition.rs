//! Gate-expression evaluation.
//!
//! A register's `log_condition` is a small boolean rule deciding whether a
//! pending write may proceed, e.g.
//!
//! ```text
//! Value > 100 AND Reg_DoorClosed == '1' OR Reg_Override == '1'
//! ```
//!
//! `OR` binds loosest: the expression is true iff at least one OR-separated
//! group is true, and a group is true iff every AND-separated atom in it is
//! true. Atoms are `identifier comparator literal` with no parenthesis
//! support. `Value` (any case) is the value about to be logged; `Reg_<name>`
//! is the latest observed value of a sibling register.
//!
//! Evaluation fails closed: an empty expression always passes, but a
//! malformed atom or an unknown sibling makes its atom false, logged as a
//! warning rather than raised. When in doubt, do not log.
//!
//! Both operands are compared numerically when both parse as floats (with an
//! epsilon for equality, so `'007'` equals `7`); otherwise the comparison
//! falls back to case-insensitive string ordering.

use std::collections::HashMap;

use tracing::warn;

/// Tolerance for numeric equality; floats decoded from device words and
/// re-parsed from text never compare bit-exactly.
const EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparator {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

/// Comparators by scan priority: two-character operators first so `>=` is
/// never misread as `>` followed by garbage.
const COMPARATORS: [(&str, Comparator); 6] = [
    ("==", Comparator::Eq),
    ("!=", Comparator::Ne),
    (">=", Comparator::Ge),
    ("<=", Comparator::Le),
    (">", Comparator::Gt),
    ("<", Comparator::Lt),
];

/// Evaluates a gate expression against the value about to be logged and a
/// snapshot of every sibling register's latest value.
pub fn evaluate(
    expression: &str,
    current_value: &str,
    siblings: &HashMap<String, String>,
) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return true;
    }

    split_keyword(expression, "OR").iter().any(|group| {
        let atoms = split_keyword(group, "AND");
        !atoms.is_empty()
            && atoms.iter().all(|atom| {
                eval_atom(atom, current_value, siblings).unwrap_or_else(|| {
                    warn!(atom = atom.trim(), expression, "Gate atom failed, treating as false");
                    false
                })
            })
    })
}

/// Splits on a case-insensitive whole-word keyword, ignoring matches inside
/// single- or double-quoted literals. Quote state is tracked character by
/// character, so `Value == 'A AND B'` stays one atom.
fn split_keyword(expr: &str, keyword: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_single = false;
    let mut in_double = false;

    let chars: Vec<(usize, char)> = expr.char_indices().collect();
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if !in_single && !in_double && keyword_at(expr, pos, keyword) => {
                parts.push(expr[start..pos].to_string());
                start = pos + keyword.len();
                i += keyword.len();
                continue;
            },
            _ => {},
        }
        i += 1;
    }
    parts.push(expr[start..].to_string());
    parts
}

fn keyword_at(expr: &str, pos: usize, keyword: &str) -> bool {
    let end = pos + keyword.len();
    if end > expr.len() || !expr.is_char_boundary(end) {
        return false;
    }
    if !expr[pos..end].eq_ignore_ascii_case(keyword) {
        return false;
    }
    let before_ok = expr[..pos].chars().next_back().is_none_or(|c| !is_word_char(c));
    let after_ok = expr[end..].chars().next().is_none_or(|c| !is_word_char(c));
    before_ok && after_ok
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Evaluates one `identifier comparator literal` atom. `None` marks a
/// malformed atom or an unresolvable identifier.
fn eval_atom(
    atom: &str,
    current_value: &str,
    siblings: &HashMap<String, String>,
) -> Option<bool> {
    let (lhs, op, rhs) = split_comparator(atom)?;

    let identifier = lhs.trim();
    let literal = rhs.trim();
    if identifier.is_empty() || literal.is_empty() {
        return None;
    }

    let left = resolve_identifier(identifier, current_value, siblings)?;
    Some(compare(&left, &unquote(literal), op))
}

/// Finds the first comparator outside quotes and splits the atom around it.
fn split_comparator(atom: &str) -> Option<(&str, Comparator, &str)> {
    let mut in_single = false;
    let mut in_double = false;

    for (pos, c) in atom.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if !in_single && !in_double => {
                for (symbol, op) in COMPARATORS {
                    if atom[pos..].starts_with(symbol) {
                        return Some((&atom[..pos], op, &atom[pos + symbol.len()..]));
                    }
                }
            },
            _ => {},
        }
    }
    None
}

fn resolve_identifier(
    identifier: &str,
    current_value: &str,
    siblings: &HashMap<String, String>,
) -> Option<String> {
    if identifier.eq_ignore_ascii_case("value") {
        return Some(current_value.to_string());
    }
    if let Some(name) = identifier.strip_prefix("Reg_") {
        return siblings.get(name).cloned();
    }
    None
}

fn unquote(literal: &str) -> String {
    let bytes = literal.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        literal[1..literal.len() - 1].to_string()
    } else {
        literal.to_string()
    }
}

fn compare(left: &str, right: &str, op: Comparator) -> bool {
    if let (Ok(a), Ok(b)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        return match op {
            Comparator::Eq => (a - b).abs() < EPSILON,
            Comparator::Ne => (a - b).abs() >= EPSILON,
            Comparator::Ge => a >= b,
            Comparator::Le => a <= b,
            Comparator::Gt => a > b,
            Comparator::Lt => a < b,
        };
    }

    let (a, b) = (left.to_lowercase(), right.to_lowercase());
    match op {
        Comparator::Eq => a == b,
        Comparator::Ne => a != b,
        Comparator::Ge => a >= b,
        Comparator::Le => a <= b,
        Comparator::Gt => a > b,
        Comparator::Lt => a < b,
    }
}
