use std::collections::{BTreeSet, HashMap};

use crate::bytes::{BitSet, BufferError, ByteBuffer};
use crate::value::{Value, ValueType};

/// Chunk encoding/decoding failures. These surface as compile errors
/// when producing a chunk and as fatal VM errors when consuming one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChunkError {
    #[error("constant pool does not support this value type: {0}")]
    UnsupportedConstant(&'static str),
    #[error("string constant exceeds max encoded length: {0} bytes")]
    StringTooLong(usize),
    #[error("unknown value type tag: {0}")]
    UnknownValueTag(u8),
    #[error("invalid length in chunk data: {0}")]
    InvalidLength(i32),
    #[error("chunk data is truncated")]
    Truncated(#[from] BufferError),
}

type Result<T> = std::result::Result<T, ChunkError>;

/// Longest string payload the 16-bit length prefix can carry.
pub const MAX_STRING_BYTES: usize = 32767;

// ── Value codec ──────────────────────────────────────────────────────

/// Write one constant as `tag payload`. Only Integer, Double and
/// String survive persistence; everything else has no wire form.
pub fn write_value(buffer: &mut ByteBuffer, value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => {
            buffer.put_u8(ValueType::Integer as u8);
            buffer.put_i32(*v as i32);
        }
        Value::Double(v) => {
            buffer.put_u8(ValueType::Double as u8);
            buffer.put_f64(*v);
        }
        Value::Str(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > MAX_STRING_BYTES {
                return Err(ChunkError::StringTooLong(bytes.len()));
            }
            buffer.put_u8(ValueType::String as u8);
            buffer.put_i16(bytes.len() as i16);
            buffer.put_bytes(bytes);
        }
        other => return Err(ChunkError::UnsupportedConstant(other.value_type().name())),
    }
    Ok(())
}

pub fn read_value(buffer: &mut ByteBuffer) -> Result<Value> {
    let tag = buffer.get_u8()?;
    let value_type = ValueType::from_tag(tag).ok_or(ChunkError::UnknownValueTag(tag))?;
    match value_type {
        ValueType::Integer => Ok(Value::Int(buffer.get_i32()? as i64)),
        ValueType::Double => Ok(Value::Double(buffer.get_f64()?)),
        ValueType::String => {
            let len = buffer.get_i16()?;
            if len < 0 {
                return Err(ChunkError::InvalidLength(len as i32));
            }
            let bytes = buffer.get_bytes(len as usize)?;
            Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
        }
        other => Err(ChunkError::UnsupportedConstant(other.name())),
    }
}

// ── Chunk ────────────────────────────────────────────────────────────

/// An immutable compiled unit: instruction stream, serialized constant
/// pool, and a bitset marking which pool slots are variable names. A
/// plain value type: copying or persisting it needs no knowledge of
/// how it was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub codes: Vec<u8>,
    pub constants: Vec<u8>,
    pub vars: Vec<u8>,
}

impl Chunk {
    pub fn new(codes: Vec<u8>, constants: Vec<u8>, vars: Vec<u8>) -> Self {
        Chunk { codes, constants, vars }
    }

    pub fn byte_size(&self) -> usize {
        self.codes.len() + self.constants.len() + self.vars.len()
    }

    pub fn codes_size(&self) -> usize {
        self.codes.len()
    }

    pub fn consts_size(&self) -> usize {
        self.constants.len()
    }

    pub fn vars_size(&self) -> usize {
        self.vars.len()
    }

    /// Length-prefixed framing of the three regions, big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = ByteBuffer::with_capacity(self.byte_size() + 12);
        buffer.put_i32(self.codes.len() as i32);
        buffer.put_bytes(&self.codes);
        buffer.put_i32(self.constants.len() as i32);
        buffer.put_bytes(&self.constants);
        buffer.put_i32(self.vars.len() as i32);
        buffer.put_bytes(&self.vars);
        buffer.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk> {
        let mut buffer = ByteBuffer::from_bytes(bytes);
        let codes = read_region(&mut buffer)?;
        let constants = read_region(&mut buffer)?;
        let vars = read_region(&mut buffer)?;
        Ok(Chunk { codes, constants, vars })
    }
}

fn read_region(buffer: &mut ByteBuffer) -> Result<Vec<u8>> {
    let len = buffer.get_i32()?;
    if len < 0 {
        return Err(ChunkError::InvalidLength(len));
    }
    Ok(buffer.get_bytes(len as usize)?)
}

// ── Constant pool ────────────────────────────────────────────────────

/// Append-only table of deduplicated constants. Indices are stable
/// once assigned; instructions and the variable bitset refer to them.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    constants: Vec<Value>,
    index: HashMap<String, usize>,
}

/// Dedup key: the value's display form prefixed with its type tag, so
/// `7`, `7.0` and `"7"` occupy distinct slots.
fn pool_key(value: &Value) -> String {
    format!("{}:{}", value.value_type() as u8, value)
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buffer = ByteBuffer::from_bytes(bytes);
        let mut pool = ConstantPool::new();
        while buffer.remaining() > 0 {
            let value = read_value(&mut buffer)?;
            let key = pool_key(&value);
            pool.index.entry(key).or_insert(pool.constants.len());
            pool.constants.push(value);
        }
        Ok(pool)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = ByteBuffer::with_capacity(self.constants.len() * 8);
        for value in &self.constants {
            write_value(&mut buffer, value)?;
        }
        Ok(buffer.into_bytes())
    }

    /// Intern a constant, returning its (possibly pre-existing) slot.
    pub fn add(&mut self, value: Value) -> Result<usize> {
        let key = pool_key(&value);
        if let Some(&ix) = self.index.get(&key) {
            return Ok(ix);
        }
        match value.value_type() {
            ValueType::Integer | ValueType::Double | ValueType::String | ValueType::Boolean => {}
            other => return Err(ChunkError::UnsupportedConstant(other.name())),
        }
        let ix = self.constants.len();
        self.constants.push(value);
        self.index.insert(key, ix);
        Ok(ix)
    }

    pub fn get(&self, ix: usize) -> Option<&Value> {
        self.constants.get(ix)
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.index.get(&pool_key(value)).copied()
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn clear(&mut self) {
        self.constants.clear();
        self.index.clear();
    }
}

// ── Writer / reader ──────────────────────────────────────────────────

/// Accumulates the instruction stream, constant pool and variable
/// bitset during compilation, then freezes them into a [`Chunk`].
#[derive(Debug, Default)]
pub struct ChunkWriter {
    code: ByteBuffer,
    pool: ConstantPool,
    var_bits: BitSet,
}

impl ChunkWriter {
    pub fn new() -> Self {
        ChunkWriter::default()
    }

    pub fn clear(&mut self) {
        self.code.clear();
        self.pool.clear();
        self.var_bits = BitSet::new();
    }

    pub fn position(&self) -> usize {
        self.code.position()
    }

    pub fn write_byte(&mut self, value: u8) {
        self.code.put_u8(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.code.put_i32(value);
    }

    pub fn update_i32(&mut self, index: usize, value: i32) -> Result<()> {
        Ok(self.code.put_i32_at(index, value)?)
    }

    pub fn add_constant(&mut self, value: Value) -> Result<usize> {
        self.pool.add(value)
    }

    /// Mark every given name's pool slot in the variable bitset,
    /// interning names the bytecode itself never mentioned.
    pub fn set_variables(&mut self, vars: &BTreeSet<String>) -> Result<()> {
        for name in vars {
            let value = Value::Str(name.clone());
            let ix = match self.pool.index_of(&value) {
                Some(ix) => ix,
                None => self.pool.add(value)?,
            };
            self.var_bits.set(ix);
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<Chunk> {
        Ok(Chunk {
            codes: self.code.as_slice().to_vec(),
            constants: self.pool.to_bytes()?,
            vars: self.var_bits.to_byte_array(),
        })
    }
}

/// Cursor over a chunk's instruction stream plus decoded pool/bitset.
#[derive(Debug)]
pub struct ChunkReader {
    code: ByteBuffer,
    pool: ConstantPool,
    var_bits: BitSet,
}

impl ChunkReader {
    pub fn new(chunk: &Chunk) -> Result<Self> {
        Ok(ChunkReader {
            code: ByteBuffer::from_bytes(&chunk.codes),
            pool: ConstantPool::from_bytes(&chunk.constants)?,
            var_bits: BitSet::from_bytes(&chunk.vars),
        })
    }

    pub fn read_byte(&mut self) -> std::result::Result<u8, BufferError> {
        self.code.get_u8()
    }

    pub fn read_i32(&mut self) -> std::result::Result<i32, BufferError> {
        self.code.get_i32()
    }

    pub fn constant(&self, ix: usize) -> Option<&Value> {
        self.pool.get(ix)
    }

    /// The dotted variable names recorded at compile time, in pool
    /// slot order.
    pub fn variables(&self) -> Vec<String> {
        (0..self.pool.len())
            .filter(|&ix| self.var_bits.get(ix))
            .filter_map(|ix| self.pool.get(ix).map(Value::to_string))
            .collect()
    }

    pub fn position(&self) -> usize {
        self.code.position()
    }

    pub fn set_position(&mut self, position: usize) -> std::result::Result<(), BufferError> {
        self.code.set_position(position)
    }

    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    pub fn remaining(&self) -> usize {
        self.code.remaining()
    }
}
