//! Calculator tool: evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `//` (floor division), `%` (modulo with the
//! sign of the divisor), `**` (right-associative power), parentheses and
//! unary signs. Evaluation runs on the blocking pool under a deadline, and
//! every failure comes back as an `Error: ...` result.

use std::time::Duration;

use async_trait::async_trait;
use threadline_config::CalculatorConfig;
use threadline_core::error::ToolError;
use threadline_core::tool::{Tool, ToolResult};
use tracing::debug;

const MAX_DEPTH: usize = 64;

pub struct CalculatorTool {
    timeout: Duration,
    max_len: usize,
}

impl CalculatorTool {
    pub fn new(timeout: Duration, max_len: usize) -> Self {
        Self { timeout, max_len }
    }

    pub fn from_config(config: &CalculatorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.timeout_ms),
            config.max_expression_len,
        )
    }

    fn failure(reason: impl std::fmt::Display) -> ToolResult {
        ToolResult {
            call_id: String::new(),
            success: false,
            output: format!("Error: {reason}"),
            data: None,
        }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::from_config(&CalculatorConfig::default())
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate a math expression. Example: 2 + 3 * 4"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4' or '2 ** 10'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?
            .to_string();

        if expr.len() > self.max_len {
            return Ok(Self::failure(format!(
                "expression longer than {} characters",
                self.max_len
            )));
        }

        let evaluation = tokio::task::spawn_blocking(move || evaluate(&expr));
        let value = match tokio::time::timeout(self.timeout, evaluation).await {
            Ok(Ok(Ok(value))) => value,
            Ok(Ok(Err(e))) => return Ok(Self::failure(e)),
            Ok(Err(join_err)) => return Ok(Self::failure(join_err)),
            Err(_) => {
                return Ok(Self::failure(format!(
                    "evaluation exceeded {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        debug!(value, "Calculator evaluated expression");
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format!("Result: {}", format_number(value)),
            data: Some(serde_json::json!({ "result": value })),
        })
    }
}

/// Print integral values without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(format!("unexpected token {tok} at position {}", parser.pos));
    }
    if !result.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Power,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::DoubleSlash => f.write_str("'//'"),
            Token::Percent => f.write_str("'%'"),
            Token::Power => f.write_str("'**'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '*' => {
                if chars.next_if(|&(_, c)| c == '*').is_some() {
                    Token::Power
                } else {
                    Token::Star
                }
            }
            '/' => {
                if chars.next_if(|&(_, c)| c == '/').is_some() {
                    Token::DoubleSlash
                } else {
                    Token::Slash
                }
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start + c.len_utf8();
                while let Some((i, c)) = chars.next_if(|&(_, c)| c.is_ascii_digit() || c == '.' || c == '_') {
                    end = i + c.len_utf8();
                }
                let literal = input[start..end].replace('_', "");
                let value = literal
                    .parse()
                    .map_err(|_| format!("invalid number '{}'", &input[start..end]))?;
                Token::Number(value)
            }
            c => return Err(format!("unexpected character '{c}'")),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        Ok(())
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    left += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    left -= self.parse_term()?;
                }
                _ => return Ok(left),
            }
        }
    }

    // term = unary (('*' | '/' | '//' | '%') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(op @ (Token::Star | Token::Slash | Token::DoubleSlash | Token::Percent)) => op,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = match op {
                Token::Star => left * right,
                _ if right == 0.0 => return Err("division by zero".into()),
                Token::Slash => left / right,
                Token::DoubleSlash => (left / right).floor(),
                _ => left - right * (left / right).floor(),
            };
        }
    }

    // unary = ('-' | '+') unary | power
    fn parse_unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                self.descend()?;
                let value = -self.parse_unary()?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Plus) => {
                self.advance();
                self.descend()?;
                let value = self.parse_unary()?;
                self.depth -= 1;
                Ok(value)
            }
            _ => self.parse_power(),
        }
    }

    // power = primary ('**' unary)?
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_primary()?;
        if self.peek() == Some(Token::Power) {
            self.advance();
            self.descend()?;
            let exponent = self.parse_unary()?;
            self.depth -= 1;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // primary = NUMBER | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.parse_expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("unexpected token {tok}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_precedence() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_unary() {
        assert_eq!(evaluate("2 ** 3 ** 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ** 2").unwrap(), -4.0);
        assert_eq!(evaluate("2 ** -1").unwrap(), 0.5);
    }

    #[test]
    fn floor_division_and_modulo_follow_divisor_sign() {
        assert_eq!(evaluate("7 // 2").unwrap(), 3.0);
        assert_eq!(evaluate("-7 // 2").unwrap(), -4.0);
        assert_eq!(evaluate("7 % 3").unwrap(), 1.0);
        assert_eq!(evaluate("-7 % 3").unwrap(), 2.0);
    }

    #[test]
    fn division_by_zero() {
        for expr in ["1 / 0", "1 // 0", "1 % 0"] {
            assert_eq!(evaluate(expr).unwrap_err(), "division by zero");
        }
    }

    #[test]
    fn numbers_with_underscores_and_decimals() {
        assert_eq!(evaluate("1_000 * 1.5").unwrap(), 1500.0);
    }

    #[test]
    fn malformed_expressions() {
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("__import__('os')").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let expr = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&expr).unwrap_err(), "expression nested too deeply");
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(evaluate("10 ** 400").is_err());
    }

    #[tokio::test]
    async fn tool_formats_result() {
        let tool = CalculatorTool::default();
        let result = tool
            .execute(serde_json::json!({"expression": "2 + 3 * 4"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Result: 14");

        let result = tool
            .execute(serde_json::json!({"expression": "10 / 4"}))
            .await
            .unwrap();
        assert_eq!(result.output, "Result: 2.5");
    }

    #[tokio::test]
    async fn tool_reports_errors_as_data() {
        let tool = CalculatorTool::default();
        let result = tool
            .execute(serde_json::json!({"expression": "1 / 0"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "Error: division by zero");
    }

    #[tokio::test]
    async fn tool_rejects_oversized_expressions() {
        let tool = CalculatorTool::new(Duration::from_secs(1), 8);
        let result = tool
            .execute(serde_json::json!({"expression": "1 + 1 + 1 + 1"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("longer than 8"));
    }

    #[tokio::test]
    async fn tool_missing_expression() {
        let tool = CalculatorTool::default();
        let result = tool.execute(serde_json::json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn tool_definition() {
        let def = CalculatorTool::default().to_definition();
        assert_eq!(def.name, "calculate");
        assert_eq!(def.parameters["required"][0], "expression");
    }
}
