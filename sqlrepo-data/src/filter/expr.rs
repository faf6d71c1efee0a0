use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }
}

/// Boolean predicate over the columns of one entity.
///
/// Field names are column names of the entity the predicate is evaluated
/// against. [`Expr::Related`] switches the scope to the target entity of a
/// relationship for its inner predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// `low <= field <= high`
    Between {
        field: String,
        low: Value,
        high: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    /// `field IS [NOT] value` where value is `Null` or a boolean.
    Is {
        field: String,
        value: Value,
        negated: bool,
    },
    /// `LIKE` with `%`/`_` wildcards and `\` as escape character.
    Like {
        field: String,
        pattern: String,
        case_insensitive: bool,
    },
    /// At least one related row exists (and matches `expr`, when given).
    Related {
        relation: String,
        expr: Option<Box<Expr>>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Expr::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Expr::compare(field, CompareOp::Eq, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Expr::Is {
            field: field.into(),
            value: Value::Null,
            negated: false,
        }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Expr::Is {
            field: field.into(),
            value: Value::Null,
            negated: true,
        }
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Expr::In {
            field: field.into(),
            values,
        }
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>, case_insensitive: bool) -> Self {
        Expr::Like {
            field: field.into(),
            pattern: pattern.into(),
            case_insensitive,
        }
    }

    pub fn related(relation: impl Into<String>, expr: Option<Expr>) -> Self {
        Expr::Related {
            relation: relation.into(),
            expr: expr.map(Box::new),
        }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }
}

/// Escape `%`, `_` and `\` so `text` matches literally inside a LIKE pattern.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Match `text` against a LIKE `pattern` (`%` any run, `_` one char, `\` escape).
pub fn like_matches(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let (pattern, text) = if case_insensitive {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.to_string(), text.to_string())
    };
    let tokens = tokenize_like(&pattern);
    let chars: Vec<char> = text.chars().collect();
    match_tokens(&tokens, &chars)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn tokenize_like(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => tokens.push(LikeToken::AnyRun),
            '_' => tokens.push(LikeToken::AnyOne),
            '\\' => tokens.push(LikeToken::Literal(chars.next().unwrap_or('\\'))),
            other => tokens.push(LikeToken::Literal(other)),
        }
    }
    tokens
}

fn match_tokens(tokens: &[LikeToken], text: &[char]) -> bool {
    // matches[j]: tokens consumed so far match text[..j]
    let mut matches = vec![false; text.len() + 1];
    matches[0] = true;
    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::AnyRun => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matches[j];
                    next[j] = reachable;
                }
            }
            LikeToken::AnyOne => {
                for j in 0..text.len() {
                    next[j + 1] = matches[j];
                }
            }
            LikeToken::Literal(c) => {
                for j in 0..text.len() {
                    next[j + 1] = matches[j] && text[j] == *c;
                }
            }
        }
        matches = next;
    }
    matches[text.len()]
}
