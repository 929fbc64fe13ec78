//! # Filter Expressions
//!
//! Infix token programs over named features, evaluated per tuple key.
//!
//! An [`Expression`] is built from an infix [`Token`] sequence. On first
//! evaluation the program is converted once to postfix with the
//! shunting-yard algorithm (all operators are binary and left-associative);
//! evaluation is then a stack machine over the postfix form. Feature tokens
//! probe the [`FeatureMap`] for the current tuple key and project the stored
//! variant to a double.
//!
//! The result is a double; callers interpret non-zero as "match". Every
//! failure mode — missing feature, projection mismatch, malformed program —
//! surfaces as [`ExprError`] and the caller treats the tuple as
//! non-matching. Evaluation never mutates anything: it is a pure function
//! of the feature-map snapshot, the tuple key, and the token program.

use std::sync::OnceLock;

use crate::feature::{FeatureMap, FeatureProjection};

/// Errors raised by expression conversion or evaluation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    /// The infix program has unbalanced parentheses.
    #[error("unbalanced parentheses in expression")]
    UnbalancedParens,

    /// The program is empty.
    #[error("empty expression")]
    EmptyExpression,

    /// Evaluation could not produce a value: a feature was missing, a
    /// projection did not fit the stored variant, or the program left the
    /// operand stack malformed.
    #[error("evaluation failed: {0}")]
    EvaluationFailed(&'static str),
}

/// A binary operator, all left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division (IEEE semantics; division by zero yields inf/NaN).
    Div,
    /// Less-than comparison, pushes 0.0 or 1.0.
    LessThan,
    /// Greater-than comparison, pushes 0.0 or 1.0.
    GreaterThan,
    /// Equality comparison, pushes 0.0 or 1.0.
    Equal,
    /// Logical and; operands coerce non-zero to true.
    And,
    /// Logical or; operands coerce non-zero to true.
    Or,
}

impl BinaryOp {
    /// Precedence level, higher binds tighter.
    #[must_use]
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::LessThan | Self::GreaterThan | Self::Equal => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div => 5,
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        let truthy = |v: f64| v != 0.0;
        let bool_to_f64 = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::LessThan => bool_to_f64(lhs < rhs),
            Self::GreaterThan => bool_to_f64(lhs > rhs),
            Self::Equal => bool_to_f64((lhs - rhs).abs() < f64::EPSILON),
            Self::And => bool_to_f64(truthy(lhs) && truthy(rhs)),
            Self::Or => bool_to_f64(truthy(lhs) || truthy(rhs)),
        }
    }
}

/// One token of an infix expression program.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A constant.
    Number(f64),
    /// A feature probe: look up `identifier` for the current tuple key and
    /// project the stored variant.
    Feature {
        /// Operator identifier the feature was published under.
        identifier: String,
        /// Projection from the stored variant to a double.
        projection: FeatureProjection,
    },
    /// A binary operator.
    Op(BinaryOp),
    /// Opening parenthesis (infix input only).
    LeftParen,
    /// Closing parenthesis (infix input only).
    RightParen,
}

impl Token {
    /// Shorthand for a scalar feature probe.
    #[must_use]
    pub fn feature(identifier: impl Into<String>) -> Self {
        Self::Feature {
            identifier: identifier.into(),
            projection: FeatureProjection::Value,
        }
    }

    /// Shorthand for a top-K frequency probe (0 = most frequent).
    #[must_use]
    pub fn topk_frequency(identifier: impl Into<String>, index: usize) -> Self {
        Self::Feature {
            identifier: identifier.into(),
            projection: FeatureProjection::TopKFrequency(index),
        }
    }
}

/// An expression program: infix as written, postfix on first use.
#[derive(Debug)]
pub struct Expression {
    infix: Vec<Token>,
    postfix: OnceLock<Result<Vec<Token>, ExprError>>,
}

impl Expression {
    /// Creates an expression from an infix token sequence. Conversion to
    /// postfix is deferred to the first evaluation and performed once.
    #[must_use]
    pub fn new(infix: Vec<Token>) -> Self {
        Self {
            infix,
            postfix: OnceLock::new(),
        }
    }

    /// The postfix form, converting on first call.
    ///
    /// # Errors
    ///
    /// [`ExprError::UnbalancedParens`] or [`ExprError::EmptyExpression`]
    /// when the infix program cannot convert.
    pub fn postfix(&self) -> Result<&[Token], ExprError> {
        match self.postfix.get_or_init(|| to_postfix(&self.infix)) {
            Ok(tokens) => Ok(tokens),
            Err(e) => Err(e.clone()),
        }
    }

    /// Evaluates the expression for a tuple key against the feature map.
    ///
    /// # Errors
    ///
    /// [`ExprError::EvaluationFailed`] when a feature is missing or a
    /// projection does not fit; conversion errors pass through.
    pub fn evaluate(&self, key: &str, features: &FeatureMap) -> Result<f64, ExprError> {
        let program = self.postfix()?;
        let mut stack: Vec<f64> = Vec::with_capacity(program.len());
        for token in program {
            match token {
                Token::Number(v) => stack.push(*v),
                Token::Feature {
                    identifier,
                    projection,
                } => {
                    let value = features
                        .apply(key, identifier, |f| projection.apply(f))
                        .ok_or(ExprError::EvaluationFailed("missing feature"))?
                        .ok_or(ExprError::EvaluationFailed("projection mismatch"))?;
                    stack.push(value);
                }
                Token::Op(op) => {
                    let rhs = stack
                        .pop()
                        .ok_or(ExprError::EvaluationFailed("operand underflow"))?;
                    let lhs = stack
                        .pop()
                        .ok_or(ExprError::EvaluationFailed("operand underflow"))?;
                    stack.push(op.apply(lhs, rhs));
                }
                Token::LeftParen | Token::RightParen => {
                    return Err(ExprError::EvaluationFailed("parenthesis in postfix"))
                }
            }
        }
        if stack.len() != 1 {
            return Err(ExprError::EvaluationFailed("leftover operands"));
        }
        Ok(stack[0])
    }
}

/// Shunting-yard conversion. Operands pass through; operators pop while the
/// stack top has equal or higher precedence (left associativity);
/// parentheses group and are eliminated. Idempotent on programs that are
/// already postfix.
fn to_postfix(infix: &[Token]) -> Result<Vec<Token>, ExprError> {
    if infix.is_empty() {
        return Err(ExprError::EmptyExpression);
    }
    let mut output = Vec::with_capacity(infix.len());
    let mut ops: Vec<Token> = Vec::new();
    for token in infix {
        match token {
            Token::Number(_) | Token::Feature { .. } => output.push(token.clone()),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = ops.last() {
                    if top.precedence() >= op.precedence() {
                        output.push(ops.pop().expect("checked"));
                    } else {
                        break;
                    }
                }
                ops.push(token.clone());
            }
            Token::LeftParen => ops.push(token.clone()),
            Token::RightParen => loop {
                match ops.pop() {
                    Some(Token::LeftParen) => break,
                    Some(op @ Token::Op(_)) => output.push(op),
                    _ => return Err(ExprError::UnbalancedParens),
                }
            },
        }
    }
    while let Some(token) = ops.pop() {
        match token {
            Token::LeftParen => return Err(ExprError::UnbalancedParens),
            op => output.push(op),
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;

    fn map_with(entries: &[(&str, &str, Feature)]) -> FeatureMap {
        let map = FeatureMap::new(16);
        for (key, identifier, feature) in entries {
            map.update_insert(key, identifier, feature.clone());
        }
        map
    }

    #[test]
    fn test_precedence_mul_over_add() {
        // 2 + 3 * 4 = 14
        let expr = Expression::new(vec![
            Token::Number(2.0),
            Token::Op(BinaryOp::Add),
            Token::Number(3.0),
            Token::Op(BinaryOp::Mul),
            Token::Number(4.0),
        ]);
        let map = FeatureMap::new(4);
        assert!((expr.evaluate("k", &map).unwrap() - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_parentheses_group() {
        // (2 + 3) * 4 = 20
        let expr = Expression::new(vec![
            Token::LeftParen,
            Token::Number(2.0),
            Token::Op(BinaryOp::Add),
            Token::Number(3.0),
            Token::RightParen,
            Token::Op(BinaryOp::Mul),
            Token::Number(4.0),
        ]);
        let map = FeatureMap::new(4);
        assert!((expr.evaluate("k", &map).unwrap() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_feature_probe_and_comparison() {
        let map = map_with(&[("D", "f1", Feature::Single(0.3)), ("D", "f2", Feature::Single(0.5))]);
        // f1 + f2 < 0.9  -> 1.0
        let expr = Expression::new(vec![
            Token::feature("f1"),
            Token::Op(BinaryOp::Add),
            Token::feature("f2"),
            Token::Op(BinaryOp::LessThan),
            Token::Number(0.9),
        ]);
        assert!((expr.evaluate("D", &map).unwrap() - 1.0).abs() < f64::EPSILON);
        // Unknown key: evaluation fails, caller drops the tuple.
        assert_eq!(
            expr.evaluate("ghost", &map),
            Err(ExprError::EvaluationFailed("missing feature"))
        );
    }

    #[test]
    fn test_logical_coercion() {
        // 2.0 And 0.0 -> 0.0 ; 2.0 Or 0.0 -> 1.0
        let and = Expression::new(vec![
            Token::Number(2.0),
            Token::Op(BinaryOp::And),
            Token::Number(0.0),
        ]);
        let or = Expression::new(vec![
            Token::Number(2.0),
            Token::Op(BinaryOp::Or),
            Token::Number(0.0),
        ]);
        let map = FeatureMap::new(4);
        assert!((and.evaluate("k", &map).unwrap()).abs() < f64::EPSILON);
        assert!((or.evaluate("k", &map).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_projection_mismatch_fails_evaluation() {
        let map = map_with(&[("D", "top", Feature::Single(1.0))]);
        let expr = Expression::new(vec![Token::topk_frequency("top", 0)]);
        assert_eq!(
            expr.evaluate("D", &map),
            Err(ExprError::EvaluationFailed("projection mismatch"))
        );
    }

    #[test]
    fn test_postfix_idempotent_on_single_token() {
        let expr = Expression::new(vec![Token::Number(7.0)]);
        let first = expr.postfix().unwrap().to_vec();
        let again = Expression::new(first.clone());
        assert_eq!(again.postfix().unwrap(), &first[..]);
    }

    #[test]
    fn test_unbalanced_parens_rejected() {
        let expr = Expression::new(vec![Token::LeftParen, Token::Number(1.0)]);
        assert_eq!(expr.postfix().unwrap_err(), ExprError::UnbalancedParens);
    }

    #[test]
    fn test_empty_program_rejected() {
        let expr = Expression::new(vec![]);
        assert_eq!(expr.postfix().unwrap_err(), ExprError::EmptyExpression);
    }
}
