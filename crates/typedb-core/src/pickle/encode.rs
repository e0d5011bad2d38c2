//! Protocol 2 encoder.
//!
//! Used to build database files for fixtures and tests. The output mirrors
//! what Python's pickler emits for the same value, minus memoization.

use super::opcodes as op;
use super::value::RawValue;

/// Items per `SETITEMS`/`APPENDS` batch.
const BATCH_SIZE: usize = 1000;

/// Encode `value` as a complete protocol 2 stream.
pub fn encode(value: &RawValue) -> Vec<u8> {
    let mut out = vec![op::PROTO, 2];
    write_value(&mut out, value);
    out.push(op::STOP);
    out
}

fn write_value(out: &mut Vec<u8>, value: &RawValue) {
    match value {
        RawValue::None => out.push(op::NONE),
        RawValue::Bool(true) => out.push(op::NEWTRUE),
        RawValue::Bool(false) => out.push(op::NEWFALSE),
        RawValue::Int(i) => write_int(out, *i),
        RawValue::BigInt(text) => {
            out.push(op::LONG);
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"L\n");
        }
        RawValue::Float(x) => {
            out.push(op::BINFLOAT);
            out.extend_from_slice(&x.to_be_bytes());
        }
        RawValue::Str(s) => write_str(out, s),
        RawValue::Tuple(items) => match items.len() {
            0 => out.push(op::EMPTY_TUPLE),
            1..=3 => {
                for item in items {
                    write_value(out, item);
                }
                out.push(op::TUPLE1 + (items.len() - 1) as u8);
            }
            _ => {
                out.push(op::MARK);
                for item in items {
                    write_value(out, item);
                }
                out.push(op::TUPLE);
            }
        },
        RawValue::List(items) => {
            out.push(op::EMPTY_LIST);
            for chunk in items.chunks(BATCH_SIZE) {
                if let [item] = chunk {
                    write_value(out, item);
                    out.push(op::APPEND);
                } else {
                    out.push(op::MARK);
                    for item in chunk {
                        write_value(out, item);
                    }
                    out.push(op::APPENDS);
                }
            }
        }
        RawValue::Dict(map) => {
            out.push(op::EMPTY_DICT);
            let entries: Vec<_> = map.iter().collect();
            for chunk in entries.chunks(BATCH_SIZE) {
                if let [(key, value)] = chunk {
                    write_str(out, key);
                    write_value(out, value);
                    out.push(op::SETITEM);
                } else {
                    out.push(op::MARK);
                    for (key, value) in chunk {
                        write_str(out, key);
                        write_value(out, value);
                    }
                    out.push(op::SETITEMS);
                }
            }
        }
    }
}

fn write_int(out: &mut Vec<u8>, value: i64) {
    if (0..=0xff).contains(&value) {
        out.push(op::BININT1);
        out.push(value as u8);
    } else if (0..=0xffff).contains(&value) {
        out.push(op::BININT2);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if let Ok(small) = i32::try_from(value) {
        out.push(op::BININT);
        out.extend_from_slice(&small.to_le_bytes());
    } else {
        let bytes = value.to_le_bytes();
        // Trim redundant sign-extension bytes.
        let mut len = bytes.len();
        while len > 1 {
            let top = bytes[len - 1];
            let next_sign = bytes[len - 2] & 0x80;
            if (top == 0x00 && next_sign == 0) || (top == 0xff && next_sign != 0) {
                len -= 1;
            } else {
                break;
            }
        }
        out.push(op::LONG1);
        out.push(len as u8);
        out.extend_from_slice(&bytes[..len]);
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.push(op::BINUNICODE);
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
