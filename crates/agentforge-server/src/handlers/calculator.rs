//! Calculator capabilities: expression evaluation and unit conversion.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use agentforge_protocols::CapabilityDescriptor;

use crate::handler::{CapabilityHandler, HandlerError};

#[derive(Debug, Deserialize)]
struct CalculateArgs {
    expression: String,
}

/// Evaluates a mathematical expression.
pub struct CalculateHandler {
    descriptor: CapabilityDescriptor,
}

impl CalculateHandler {
    pub fn new() -> Self {
        let schema = json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Mathematical expression to evaluate (e.g., 'sqrt(2) * pi / 3')"
                }
            },
            "required": ["expression"]
        });

        Self {
            descriptor: CapabilityDescriptor::new(
                "calculate",
                "Evaluate a mathematical expression. Supports +, -, *, /, **, sqrt(), log(), sin(), cos(), pi, e.",
            )
            .with_parameters(schema),
        }
    }
}

impl Default for CalculateHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHandler for CalculateHandler {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn handle(&self, arguments: Value) -> Result<Value, HandlerError> {
        let args: CalculateArgs = serde_json::from_value(arguments)
            .map_err(|e| HandlerError::InvalidArguments(e.to_string()))?;
        if args.expression.trim().is_empty() {
            return Err(HandlerError::InvalidArguments(
                "no expression provided".to_string(),
            ));
        }

        let result = eval::evaluate(&args.expression).map_err(HandlerError::Failed)?;
        Ok(json!({
            "expression": args.expression,
            "result": result,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ConvertUnitsArgs {
    value: f64,
    from_unit: String,
    to_unit: String,
}

const CONVERSIONS: &[(&str, &str, fn(f64) -> f64)] = &[
    ("km", "miles", |v| v * 0.621371),
    ("miles", "km", |v| v * 1.60934),
    ("kg", "lb", |v| v * 2.20462),
    ("lb", "kg", |v| v * 0.453592),
    ("celsius", "fahrenheit", |v| v * 9.0 / 5.0 + 32.0),
    ("fahrenheit", "celsius", |v| (v - 32.0) * 5.0 / 9.0),
    ("m", "ft", |v| v * 3.28084),
    ("ft", "m", |v| v * 0.3048),
];

/// Converts between common units (length, weight, temperature).
pub struct ConvertUnitsHandler {
    descriptor: CapabilityDescriptor,
}

impl ConvertUnitsHandler {
    pub fn new() -> Self {
        let schema = json!({
            "type": "object",
            "properties": {
                "value": {"type": "number", "description": "The value to convert"},
                "from_unit": {"type": "string", "description": "Source unit (e.g., 'km', 'lb', 'celsius')"},
                "to_unit": {"type": "string", "description": "Target unit (e.g., 'miles', 'kg', 'fahrenheit')"}
            },
            "required": ["value", "from_unit", "to_unit"]
        });

        Self {
            descriptor: CapabilityDescriptor::new(
                "convert_units",
                "Convert between common units (length, weight, temperature).",
            )
            .with_parameters(schema),
        }
    }
}

impl Default for ConvertUnitsHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHandler for ConvertUnitsHandler {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn handle(&self, arguments: Value) -> Result<Value, HandlerError> {
        let args: ConvertUnitsArgs = serde_json::from_value(arguments)
            .map_err(|e| HandlerError::InvalidArguments(e.to_string()))?;

        let from = args.from_unit.to_lowercase();
        let to = args.to_unit.to_lowercase();

        let convert = CONVERSIONS
            .iter()
            .find(|(f, t, _)| *f == from && *t == to)
            .map(|(_, _, conv)| conv)
            .ok_or_else(|| {
                let available: Vec<String> = CONVERSIONS
                    .iter()
                    .map(|(f, t, _)| format!("{} -> {}", f, t))
                    .collect();
                HandlerError::Failed(format!(
                    "Unknown conversion: {} -> {}. Available: {:?}",
                    from, to, available
                ))
            })?;

        Ok(json!({
            "value": args.value,
            "from": from,
            "to": to,
            "result": convert(args.value),
        }))
    }
}

/// Tiny expression evaluator.
///
/// Grammar: `+ - * /`, `**` (right-associative), parentheses, unary minus,
/// the constants `pi` and `e`, and one-argument functions `sqrt`, `log`,
/// `log10`, `sin`, `cos`, `tan`, `abs`, `round`.
mod eval {
    #[derive(Debug, Clone, PartialEq)]
    enum Token {
        Number(f64),
        Ident(String),
        Plus,
        Minus,
        Star,
        Slash,
        Pow,
        LParen,
        RParen,
    }

    fn tokenize(input: &str) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        let chars: Vec<char> = input.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                ' ' | '\t' => i += 1,
                '+' => {
                    tokens.push(Token::Plus);
                    i += 1;
                }
                '-' => {
                    tokens.push(Token::Minus);
                    i += 1;
                }
                '*' => {
                    if chars.get(i + 1) == Some(&'*') {
                        tokens.push(Token::Pow);
                        i += 2;
                    } else {
                        tokens.push(Token::Star);
                        i += 1;
                    }
                }
                '/' => {
                    tokens.push(Token::Slash);
                    i += 1;
                }
                '^' => {
                    tokens.push(Token::Pow);
                    i += 1;
                }
                '(' => {
                    tokens.push(Token::LParen);
                    i += 1;
                }
                ')' => {
                    tokens.push(Token::RParen);
                    i += 1;
                }
                '0'..='9' | '.' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let n = text
                        .parse::<f64>()
                        .map_err(|_| format!("invalid number: {}", text))?;
                    tokens.push(Token::Number(n));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len()
                        && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                    {
                        i += 1;
                    }
                    tokens.push(Token::Ident(chars[start..i].iter().collect()));
                }
                c => return Err(format!("unexpected character: '{}'", c)),
            }
        }

        Ok(tokens)
    }

    struct Parser {
        tokens: Vec<Token>,
        pos: usize,
    }

    impl Parser {
        fn peek(&self) -> Option<&Token> {
            self.tokens.get(self.pos)
        }

        fn advance(&mut self) -> Option<Token> {
            let tok = self.tokens.get(self.pos).cloned();
            if tok.is_some() {
                self.pos += 1;
            }
            tok
        }

        fn expect(&mut self, expected: Token) -> Result<(), String> {
            match self.advance() {
                Some(tok) if tok == expected => Ok(()),
                Some(tok) => Err(format!("expected {:?}, found {:?}", expected, tok)),
                None => Err(format!("expected {:?}, found end of input", expected)),
            }
        }

        // expr := term (('+' | '-') term)*
        fn expr(&mut self) -> Result<f64, String> {
            let mut value = self.term()?;
            loop {
                match self.peek() {
                    Some(Token::Plus) => {
                        self.advance();
                        value += self.term()?;
                    }
                    Some(Token::Minus) => {
                        self.advance();
                        value -= self.term()?;
                    }
                    _ => return Ok(value),
                }
            }
        }

        // term := unary (('*' | '/') unary)*
        fn term(&mut self) -> Result<f64, String> {
            let mut value = self.unary()?;
            loop {
                match self.peek() {
                    Some(Token::Star) => {
                        self.advance();
                        value *= self.unary()?;
                    }
                    Some(Token::Slash) => {
                        self.advance();
                        let divisor = self.unary()?;
                        if divisor == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        value /= divisor;
                    }
                    _ => return Ok(value),
                }
            }
        }

        // unary := '-' unary | power
        fn unary(&mut self) -> Result<f64, String> {
            if self.peek() == Some(&Token::Minus) {
                self.advance();
                return Ok(-self.unary()?);
            }
            self.power()
        }

        // power := atom ('**' unary)?
        fn power(&mut self) -> Result<f64, String> {
            let base = self.atom()?;
            if self.peek() == Some(&Token::Pow) {
                self.advance();
                let exponent = self.unary()?;
                return Ok(base.powf(exponent));
            }
            Ok(base)
        }

        fn atom(&mut self) -> Result<f64, String> {
            match self.advance() {
                Some(Token::Number(n)) => Ok(n),
                Some(Token::LParen) => {
                    let value = self.expr()?;
                    self.expect(Token::RParen)?;
                    Ok(value)
                }
                Some(Token::Ident(name)) => match name.as_str() {
                    "pi" => Ok(std::f64::consts::PI),
                    "e" => Ok(std::f64::consts::E),
                    _ => {
                        self.expect(Token::LParen)?;
                        let arg = self.expr()?;
                        self.expect(Token::RParen)?;
                        apply_function(&name, arg)
                    }
                },
                Some(tok) => Err(format!("unexpected token: {:?}", tok)),
                None => Err("unexpected end of expression".to_string()),
            }
        }
    }

    fn apply_function(name: &str, arg: f64) -> Result<f64, String> {
        match name {
            "sqrt" => Ok(arg.sqrt()),
            "log" => Ok(arg.ln()),
            "log10" => Ok(arg.log10()),
            "sin" => Ok(arg.sin()),
            "cos" => Ok(arg.cos()),
            "tan" => Ok(arg.tan()),
            "abs" => Ok(arg.abs()),
            "round" => Ok(arg.round()),
            _ => Err(format!("unknown function: {}", name)),
        }
    }

    pub fn evaluate(expression: &str) -> Result<f64, String> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser { tokens, pos: 0 };
        let value = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!(
                "trailing input at token {:?}",
                parser.tokens[parser.pos]
            ));
        }
        if !value.is_finite() {
            return Err("result is not finite".to_string());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calculate_basic() {
        let handler = CalculateHandler::new();
        let result = handler
            .handle(json!({"expression": "2 + 2"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 4.0);
    }

    #[tokio::test]
    async fn test_calculate_precedence_and_parens() {
        let handler = CalculateHandler::new();
        let result = handler
            .handle(json!({"expression": "2 + 3 * 4"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 14.0);

        let result = handler
            .handle(json!({"expression": "(2 + 3) * 4"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 20.0);
    }

    #[tokio::test]
    async fn test_calculate_functions_and_constants() {
        let handler = CalculateHandler::new();
        let result = handler
            .handle(json!({"expression": "sqrt(2) * pi / 3"}))
            .await
            .unwrap();
        let expected = 2.0_f64.sqrt() * std::f64::consts::PI / 3.0;
        let got = result["result"].as_f64().unwrap();
        assert!((got - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_calculate_power_right_associative() {
        let handler = CalculateHandler::new();
        let result = handler
            .handle(json!({"expression": "2 ** 3 ** 2"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 512.0);
    }

    #[tokio::test]
    async fn test_calculate_unary_minus() {
        let handler = CalculateHandler::new();
        let result = handler
            .handle(json!({"expression": "-3 + 5"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 2.0);
    }

    #[tokio::test]
    async fn test_calculate_division_by_zero() {
        let handler = CalculateHandler::new();
        let result = handler.handle(json!({"expression": "1 / 0"})).await;
        assert!(matches!(result, Err(HandlerError::Failed(_))));
    }

    #[tokio::test]
    async fn test_calculate_malformed_expression() {
        let handler = CalculateHandler::new();
        let result = handler.handle(json!({"expression": "2 +"})).await;
        assert!(matches!(result, Err(HandlerError::Failed(_))));

        let result = handler.handle(json!({"expression": "2 $ 2"})).await;
        assert!(matches!(result, Err(HandlerError::Failed(_))));
    }

    #[tokio::test]
    async fn test_calculate_empty_expression() {
        let handler = CalculateHandler::new();
        let result = handler.handle(json!({"expression": "  "})).await;
        assert!(matches!(result, Err(HandlerError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_convert_units_km_to_miles() {
        let handler = ConvertUnitsHandler::new();
        let result = handler
            .handle(json!({"value": 10.0, "from_unit": "km", "to_unit": "miles"}))
            .await
            .unwrap();
        let got = result["result"].as_f64().unwrap();
        assert!((got - 6.21371).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_convert_units_temperature() {
        let handler = ConvertUnitsHandler::new();
        let result = handler
            .handle(json!({"value": 100.0, "from_unit": "Celsius", "to_unit": "Fahrenheit"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 212.0);
    }

    #[tokio::test]
    async fn test_convert_units_unknown_pair() {
        let handler = ConvertUnitsHandler::new();
        let result = handler
            .handle(json!({"value": 1.0, "from_unit": "km", "to_unit": "kg"}))
            .await;
        assert!(matches!(result, Err(HandlerError::Failed(_))));
    }
}
