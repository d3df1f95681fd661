//! Textual rule syntax.
//!
//! Operator consoles and config files describe flow rules as
//! `if <window> && <window> then <action>; <action>`. Operands address
//! packet header fields by name (`P.DST`), raw packet bytes (`P[12]`), the
//! status register (`S[3]`), or literals (`42`, `0.2`). Malformed input is
//! always a typed error, never silently coerced.

use std::str::FromStr;

use thiserror::Error;

use crate::addr::NodeAddress;
use crate::entry::{
    Action, ArithOp, FlowTableEntry, Location, OperandSize, Operator, ResultLocation, SetAction,
    Stats, Window,
};
use crate::packet;

/// Rule syntax errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty where a rule part was required
    #[error("empty input")]
    Empty,

    /// A required keyword is missing
    #[error("expected keyword `{0}`")]
    MissingKeyword(&'static str),

    /// An operand token could not be understood
    #[error("bad operand `{0}`")]
    BadOperand(String),

    /// A relational or arithmetic operator token could not be understood
    #[error("bad operator `{0}`")]
    BadOperator(String),

    /// An action clause could not be understood
    #[error("bad action `{0}`")]
    BadAction(String),

    /// A window clause does not have the `lhs op rhs` shape
    #[error("bad window `{0}`")]
    BadWindow(String),
}

struct Operand {
    loc: Location,
    value: u16,
    size: Option<OperandSize>,
}

fn parse_index(token: &str, prefix: char) -> Option<u16> {
    let inner = token
        .strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')?;
    inner.parse().ok()
}

fn parse_operand(token: &str) -> Result<Operand, ParseError> {
    let field = |offset: usize, size: OperandSize| Operand {
        loc: Location::Packet,
        value: offset as u16,
        size: Some(size),
    };

    match token {
        "P.NET" => return Ok(field(packet::NET_OFFSET, OperandSize::One)),
        "P.LEN" => return Ok(field(packet::LEN_OFFSET, OperandSize::One)),
        "P.DST" => return Ok(field(packet::DST_OFFSET, OperandSize::Two)),
        "P.SRC" => return Ok(field(packet::SRC_OFFSET, OperandSize::Two)),
        "P.TYP" => return Ok(field(packet::TYP_OFFSET, OperandSize::One)),
        "P.TTL" => return Ok(field(packet::TTL_OFFSET, OperandSize::One)),
        "P.NXH" => return Ok(field(packet::NXH_OFFSET, OperandSize::Two)),
        _ => {}
    }

    if let Some(offset) = parse_index(token, 'P') {
        return Ok(Operand {
            loc: Location::Packet,
            value: offset,
            size: Some(OperandSize::One),
        });
    }
    if let Some(index) = parse_index(token, 'S') {
        return Ok(Operand {
            loc: Location::Status,
            value: index,
            size: Some(OperandSize::One),
        });
    }

    let value = token
        .parse::<NodeAddress>()
        .map_err(|_| ParseError::BadOperand(token.to_string()))?;
    Ok(Operand {
        loc: Location::Const,
        value: value.as_u16(),
        size: None,
    })
}

fn parse_relation(token: &str) -> Result<Operator, ParseError> {
    match token {
        "==" => Ok(Operator::Equal),
        "!=" => Ok(Operator::NotEqual),
        ">" => Ok(Operator::Greater),
        "<" => Ok(Operator::Less),
        ">=" => Ok(Operator::GreaterOrEqual),
        "<=" => Ok(Operator::LessOrEqual),
        other => Err(ParseError::BadOperator(other.to_string())),
    }
}

fn parse_arith(token: &str) -> Result<ArithOp, ParseError> {
    match token {
        "+" => Ok(ArithOp::Add),
        "-" => Ok(ArithOp::Sub),
        "*" => Ok(ArithOp::Mul),
        "/" => Ok(ArithOp::Div),
        "%" => Ok(ArithOp::Mod),
        "&" => Ok(ArithOp::And),
        "|" => Ok(ArithOp::Or),
        "^" => Ok(ArithOp::Xor),
        other => Err(ParseError::BadOperator(other.to_string())),
    }
}

impl FromStr for Window {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [lhs, op, rhs] = tokens.as_slice() else {
            return Err(ParseError::BadWindow(s.trim().to_string()));
        };
        let lhs = parse_operand(lhs)?;
        let rhs = parse_operand(rhs)?;
        let size = match (lhs.size, rhs.size) {
            (Some(OperandSize::Two), _) | (_, Some(OperandSize::Two)) => OperandSize::Two,
            _ => OperandSize::One,
        };
        Ok(Window {
            op: parse_relation(op)?,
            lhs_loc: lhs.loc,
            rhs_loc: rhs.loc,
            size,
            lhs: lhs.value,
            rhs: rhs.value,
        })
    }
}

fn parse_set(tokens: &[&str], clause: &str) -> Result<SetAction, ParseError> {
    let [target, eq, lhs, op, rhs] = tokens else {
        return Err(ParseError::BadAction(clause.to_string()));
    };
    if *eq != "=" {
        return Err(ParseError::MissingKeyword("="));
    }
    let target = parse_operand(target)?;
    let res_loc = match target.loc {
        Location::Packet => ResultLocation::Packet,
        Location::Status => ResultLocation::Status,
        _ => return Err(ParseError::BadOperand(tokens[0].to_string())),
    };
    let lhs = parse_operand(lhs)?;
    let rhs = parse_operand(rhs)?;
    Ok(SetAction {
        op: parse_arith(op)?,
        res_loc,
        lhs_loc: lhs.loc,
        rhs_loc: rhs.loc,
        res: target.value,
        lhs: lhs.value,
        rhs: rhs.value,
    })
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let (&keyword, rest) = tokens.split_first().ok_or(ParseError::Empty)?;
        match (keyword, rest) {
            ("FORWARD_U", [addr]) => Ok(Action::ForwardUnicast {
                next_hop: addr.parse()?,
            }),
            ("FORWARD_B", [addr]) => Ok(Action::ForwardBroadcast {
                next_hop: addr.parse()?,
            }),
            ("FORWARD_B", []) => Ok(Action::ForwardBroadcast {
                next_hop: NodeAddress::BROADCAST,
            }),
            ("DROP", []) => Ok(Action::Drop),
            ("ASK", []) => Ok(Action::Ask),
            ("MATCH", []) => Ok(Action::Match),
            ("FUNCTION", [id, args @ ..]) => {
                let id = id
                    .parse()
                    .map_err(|_| ParseError::BadAction(s.trim().to_string()))?;
                let args = args
                    .iter()
                    .map(|a| a.parse())
                    .collect::<Result<Vec<u8>, _>>()
                    .map_err(|_| ParseError::BadAction(s.trim().to_string()))?;
                Ok(Action::Function { id, args })
            }
            ("SET", rest) => Ok(Action::Set(parse_set(rest, s.trim())?)),
            _ => Err(ParseError::BadAction(s.trim().to_string())),
        }
    }
}

impl FromStr for FlowTableEntry {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s.strip_prefix("if ").ok_or(ParseError::MissingKeyword("if"))?;
        let (windows, actions) = body
            .split_once(" then ")
            .ok_or(ParseError::MissingKeyword("then"))?;

        let windows = windows
            .split("&&")
            .map(str::parse)
            .collect::<Result<_, _>>()?;
        let actions = actions
            .split(';')
            .filter(|clause| !clause.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Action>, _>>()?;
        if actions.is_empty() {
            return Err(ParseError::Empty);
        }

        Ok(FlowTableEntry {
            windows,
            actions,
            stats: Stats::default(),
        })
    }
}
