use crate::error::Error;
use crate::quantity::Quantity;
use std::collections::BTreeMap;

/// Binary operators admitted in quantity expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binop {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// A parsed quantity expression such as `stage - elevation` or
/// `(xmomentum**2 + ymomentum**2)**0.5`. The textual form is user
/// ergonomics; evaluation walks this tree over a name-to-field map.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    FieldRef(String),
    Const(f64),
    Binop(Binop, Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let tokens = tokenize(text).map_err(|reason| Error::ExpressionParse {
            expression: text.to_string(),
            reason,
        })?;

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr().map_err(|reason| Error::ExpressionParse {
            expression: text.to_string(),
            reason,
        })?;

        if parser.pos != parser.tokens.len() {
            return Err(Error::ExpressionParse {
                expression: text.to_string(),
                reason: format!("unexpected trailing input at token {}", parser.pos),
            });
        }
        Ok(expr)
    }

    /// Evaluate over the given name-to-field map. The result is a fresh
    /// quantity; the map is not mutated. An expression with no field
    /// reference has no shape to take and is rejected.
    pub fn evaluate(&self, quantities: &BTreeMap<String, Quantity>) -> Result<Quantity, Error> {
        match self.eval_value(quantities)? {
            Value::Field(q) => Ok(q),
            Value::Scalar(_) => Err(Error::ExpressionParse {
                expression: format!("{:?}", self),
                reason: "expression must reference at least one quantity".to_string(),
            }),
        }
    }

    fn eval_value(&self, quantities: &BTreeMap<String, Quantity>) -> Result<Value, Error> {
        match self {
            Expression::Const(c) => Ok(Value::Scalar(*c)),
            Expression::FieldRef(name) => match quantities.get(name) {
                Some(q) => Ok(Value::Field(q.clone())),
                None => Err(Error::UnknownQuantity {
                    name: name.clone(),
                    known: quantities.keys().cloned().collect(),
                }),
            },
            Expression::Binop(op, lhs, rhs) => {
                let lhs = lhs.eval_value(quantities)?;
                let rhs = rhs.eval_value(quantities)?;
                Ok(apply(*op, lhs, rhs))
            }
        }
    }
}

enum Value {
    Field(Quantity),
    Scalar(f64),
}

fn apply(op: Binop, lhs: Value, rhs: Value) -> Value {
    let f = |a: f64, b: f64| match op {
        Binop::Add => a + b,
        Binop::Sub => a - b,
        Binop::Mul => a * b,
        Binop::Div => a / b,
        Binop::Pow => a.powf(b),
    };

    match (lhs, rhs) {
        (Value::Field(a), Value::Field(b)) => Value::Field(a.zip_with(&b, f)),
        (Value::Field(a), Value::Scalar(b)) => Value::Field(a.map(|x| f(x, b))),
        (Value::Scalar(a), Value::Field(b)) => Value::Field(b.map(|x| f(a, x))),
        (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    StarStar,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
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
                    tokens.push(Token::StarStar);
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
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            _ if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let lexeme: String = chars[start..i].iter().collect();
                let value: f64 = lexeme
                    .parse()
                    .map_err(|_| format!("bad number {:?}", lexeme))?;
                tokens.push(Token::Number(value));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(format!("unexpected character {:?}", c)),
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

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Expression, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Binop::Add,
                Some(Token::Minus) => Binop::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Expression::Binop(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expression, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Binop::Mul,
                Some(Token::Slash) => Binop::Div,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expression::Binop(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expression, String> {
        if self.peek() == Some(&Token::Minus) {
            self.bump();
            let operand = self.unary()?;
            return Ok(Expression::Binop(
                Binop::Mul,
                Box::new(Expression::Const(-1.0)),
                Box::new(operand),
            ));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expression, String> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::StarStar) {
            self.bump();
            // Right-associative, and the exponent may carry a sign.
            let exponent = self.unary()?;
            return Ok(Expression::Binop(
                Binop::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expression, String> {
        match self.bump() {
            Some(Token::Number(v)) => Ok(Expression::Const(v)),
            Some(Token::Ident(name)) => Ok(Expression::FieldRef(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected closing parenthesis".to_string()),
                }
            }
            other => Err(format!("expected a value, found {:?}", other)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Binop, Expression};
    use crate::geometry::Point;
    use crate::mesh::{Mesh, MeshOptions};
    use crate::quantity::{Location, Quantity, Values};
    use std::collections::BTreeMap;

    fn single_triangle() -> Mesh {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        Mesh::new(points, vec![[0, 1, 2]], MeshOptions::default()).unwrap()
    }

    fn quantities(values: &[(&str, f64)]) -> BTreeMap<String, Quantity> {
        let mesh = single_triangle();
        values
            .iter()
            .map(|&(name, v)| {
                let mut q = Quantity::zeros(1, mesh.boundary().len());
                q.set_values(&mesh, Values::Constant(v), Location::Vertices, None);
                (name.to_string(), q)
            })
            .collect()
    }

    #[test]
    fn parses_with_precedence() {
        let e = Expression::parse("a + b * c").unwrap();
        match e {
            Expression::Binop(Binop::Add, _, rhs) => match *rhs {
                Expression::Binop(Binop::Mul, _, _) => {}
                other => panic!("expected mul on the right, got {:?}", other),
            },
            other => panic!("expected top-level add, got {:?}", other),
        }
    }

    #[test]
    fn evaluates_depth_style_expression() {
        let q = quantities(&[("stage", 3.0), ("elevation", 1.0)]);
        let depth = Expression::parse("stage - elevation")
            .unwrap()
            .evaluate(&q)
            .unwrap();
        assert_eq!(depth.centroid_values(), &[2.0]);
    }

    #[test]
    fn evaluates_momentum_magnitude() {
        let q = quantities(&[("xmomentum", 3.0), ("ymomentum", 4.0)]);
        let speed = Expression::parse("(xmomentum**2 + ymomentum**2)**0.5")
            .unwrap()
            .evaluate(&q)
            .unwrap();
        assert!((speed.centroid_values()[0] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn unary_minus_and_scalars() {
        let q = quantities(&[("stage", 3.0)]);
        let e = Expression::parse("-stage + 10").unwrap().evaluate(&q).unwrap();
        assert_eq!(e.centroid_values(), &[7.0]);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let q = quantities(&[("stage", 3.0)]);
        assert!(Expression::parse("stage - elevation")
            .unwrap()
            .evaluate(&q)
            .is_err());
    }

    #[test]
    fn pure_constant_expression_is_rejected() {
        let q = quantities(&[("stage", 3.0)]);
        assert!(Expression::parse("1 + 2").unwrap().evaluate(&q).is_err());
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(Expression::parse("stage +").is_err());
        assert!(Expression::parse("(stage").is_err());
        assert!(Expression::parse("stage $ 2").is_err());
    }
}
