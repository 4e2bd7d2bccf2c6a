use hex::decode as hex_decode;

use crate::modules::types::{Expr, Prop};

pub fn strip_0x(bs: &[u8]) -> Vec<u8> {
  if bs.starts_with(b"0x") {
    bs[2..].to_vec()
  } else {
    bs.to_vec()
  }
}

pub fn strip_0x_str(s: &str) -> &str {
  s.strip_prefix("0x").unwrap_or(s)
}

/// Decode a hex byte string, trimming whitespace first.
pub fn hex_byte_string(msg: &str, bs: &[u8]) -> Result<Vec<u8>, String> {
  let trimmed: Vec<u8> = bs.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
  hex_decode(&trimmed).map_err(|e| format!("invalid hex bytestring for {}: {}", msg, e))
}

pub fn format_expr(expr: &Expr) -> String {
  expr.to_string()
}

fn indent(spaces: usize, text: &str) -> String {
  let padding = " ".repeat(spaces);
  text.lines().map(|line| format!("{}{}", padding, line)).collect::<Vec<String>>().join("\n")
}

pub fn format_prop(prop: &Prop) -> String {
  fn fmt(name: &str, args: &[&Expr]) -> String {
    let formatted = args.iter().map(|a| format_expr(a)).collect::<Vec<String>>().join("\n");
    format!("({}\n{})", name, indent(2, &formatted))
  }

  fn fmt_props(name: &str, args: &[&Prop]) -> String {
    let formatted = args.iter().map(|a| format_prop(a)).collect::<Vec<String>>().join("\n");
    format!("({}\n{})", name, indent(2, &formatted))
  }

  match prop {
    Prop::PEq(a, b) => fmt("PEq", &[a, b]),
    Prop::PLT(a, b) => fmt("PLT", &[a, b]),
    Prop::PGT(a, b) => fmt("PGT", &[a, b]),
    Prop::PGEq(a, b) => fmt("PGEq", &[a, b]),
    Prop::PLEq(a, b) => fmt("PLEq", &[a, b]),
    Prop::PNeg(a) => fmt_props("PNeg", &[a]),
    Prop::PAnd(a, b) => fmt_props("PAnd", &[a, b]),
    Prop::POr(a, b) => fmt_props("POr", &[a, b]),
    Prop::PImpl(a, b) => fmt_props("PImpl", &[a, b]),
    Prop::PBool(a) => format!("{}", a),
  }
}
