use std::fmt::Write;

use crate::vm::chunk::{Chunk, ChunkReader};
use crate::vm::{OpCode, VmError};

/// Render a human-readable instruction listing: position, opcode,
/// operand and owning formula index per line, ending at `OP_EXIT`.
/// Diagnostic output only; nothing downstream parses it.
pub fn disassemble(chunk: &Chunk) -> Result<String, VmError> {
    let mut reader = ChunkReader::new(chunk)?;
    let mut out = String::new();
    let mut order: i32 = 0;

    println_row(&mut out, "POSITION", "CODE", "PARAMETER", "ORDER");

    loop {
        let position = reader.position().to_string();
        let byte = reader.read_byte()?;
        let op = OpCode::from_byte(byte).ok_or(VmError::UnknownOpcode(byte))?;

        let parameter = match op {
            OpCode::Begin => {
                order = reader.read_i32()?;
                order.to_string()
            }
            OpCode::Constant => read_constant(&mut reader)?,
            OpCode::GetGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::Call => read_constant(&mut reader)?,
            OpCode::Jump | OpCode::JumpIfFalse => {
                let offset = reader.read_i32()?;
                format!(":{}->to:{}", offset, reader.position() as i64 + offset as i64)
            }
            OpCode::Exit => {
                println_row(&mut out, &position, op.title(), "", &order.to_string());
                return Ok(out);
            }
            _ => String::new(),
        };

        println_row(&mut out, &position, op.title(), &parameter, &order.to_string());
    }
}

fn read_constant(reader: &mut ChunkReader) -> Result<String, VmError> {
    let ix = reader.read_i32()?;
    reader
        .constant(ix as usize)
        .map(|v| v.to_string())
        .ok_or(VmError::BadConstant(ix))
}

fn println_row(out: &mut String, position: &str, code: &str, parameter: &str, order: &str) {
    let _ = writeln!(
        out,
        "{:<10}{:<20}{:<20}{}",
        clip(position, 10),
        clip(code, 18),
        clip(parameter, 18),
        order
    );
}

fn clip(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((ix, _)) => &s[..ix],
        None => s,
    }
}
