// Migrations - Rewrite older file layouts into the next one
//
// Every migration is offered the buffer in a fixed order and decides from the
// buffer's version and total length whether it applies. Each step rewrites one
// version into the next, so a file of any supported age walks the whole chain
// before the reader parses it.
//
// Layout history:
//   v0  node table only, no kind byte, no relays
//   v1  function table, kind byte on every node
//   v2  struct table ahead of the function table
//   v3  relay points on every wire
//   v4  input inset table at the start of every node payload

use bytes::Bytes;
use tracing::debug;

use blueprint_types::codec::{Reader, Writer};
use blueprint_types::{DecodeError, ValueType};

use crate::node::KIND_BUILTIN;

/// `version:int` followed by at least one table count
const MIN_LENGTH: usize = 8;

pub trait Migration: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this step should rewrite a buffer of the given version and size
    fn applies(&self, version: i32, total_len: usize) -> bool;

    fn migrate(&self, input: Bytes) -> Result<Bytes, DecodeError>;
}

/// The ordered list of migrations run before every decode
pub struct MigrationChain {
    steps: Vec<Box<dyn Migration>>,
}

impl Default for MigrationChain {
    fn default() -> Self {
        Self {
            steps: vec![
                Box::new(AddFunctionTable),
                Box::new(AddStructTable),
                Box::new(AddWireRelays),
                Box::new(AddInputInsets),
            ],
        }
    }
}

impl MigrationChain {
    pub fn new(steps: Vec<Box<dyn Migration>>) -> Self {
        Self { steps }
    }

    pub fn apply(&self, mut buf: Bytes) -> Result<Bytes, DecodeError> {
        for step in &self.steps {
            let version = Reader::new(buf.clone()).i32()?;
            if step.applies(version, buf.len()) {
                debug!(migration = step.name(), from = version, size = buf.len(), "Migrating graph");
                buf = step.migrate(buf)?;
            }
        }
        Ok(buf)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Copy Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn copy_i32(input: &mut Reader, out: &mut Writer) -> Result<i32, DecodeError> {
    let v = input.i32()?;
    out.i32(v);
    Ok(v)
}

fn copy_count(input: &mut Reader, out: &mut Writer) -> Result<usize, DecodeError> {
    let n = input.count()?;
    out.count(n);
    Ok(n)
}

fn copy_string(input: &mut Reader, out: &mut Writer) -> Result<(), DecodeError> {
    out.string(&input.string()?);
    Ok(())
}

fn copy_f64(input: &mut Reader, out: &mut Writer) -> Result<(), DecodeError> {
    out.f64(input.f64()?);
    Ok(())
}

/// `count:int` then `(name:string, type)` pairs
fn copy_fields(input: &mut Reader, out: &mut Writer) -> Result<(), DecodeError> {
    for _ in 0..copy_count(input, out)? {
        copy_string(input, out)?;
        ValueType::transcode(input, out)?;
    }
    Ok(())
}

/// Struct table then function table, as laid out since v2
fn copy_definitions(input: &mut Reader, out: &mut Writer) -> Result<(), DecodeError> {
    for _ in 0..copy_count(input, out)? {
        copy_string(input, out)?;
        let fields = input.u8()?;
        out.u8(fields);
        for _ in 0..fields {
            copy_string(input, out)?;
            ValueType::transcode(input, out)?;
        }
    }

    for _ in 0..copy_count(input, out)? {
        copy_string(input, out)?;
        copy_fields(input, out)?;
        copy_fields(input, out)?;
    }
    Ok(())
}

fn start(input: &Bytes, next: i32) -> Result<(Reader, Writer), DecodeError> {
    let mut reader = Reader::new(input.clone());
    reader.i32()?;
    let mut out = Writer::new();
    out.i32(next);
    Ok((reader, out))
}

fn finish(mut input: Reader, mut out: Writer) -> Bytes {
    out.raw(&input.rest());
    out.finish()
}

// ─────────────────────────────────────────────────────────────────────────────
// v0 -> v1
// ─────────────────────────────────────────────────────────────────────────────

/// Adds an empty function table and marks every node as a built-in
pub struct AddFunctionTable;

impl Migration for AddFunctionTable {
    fn name(&self) -> &'static str {
        "add-function-table"
    }

    fn applies(&self, version: i32, total_len: usize) -> bool {
        version == 0 && total_len >= MIN_LENGTH
    }

    fn migrate(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        let (mut input, mut out) = start(&input, 1)?;
        out.count(0);

        for _ in 0..copy_count(&mut input, &mut out)? {
            copy_string(&mut input, &mut out)?;
            out.u8(KIND_BUILTIN);
            out.blob(&input.blob()?);
            copy_f64(&mut input, &mut out)?;
            copy_f64(&mut input, &mut out)?;
            for _ in 0..copy_count(&mut input, &mut out)? {
                for _ in 0..copy_count(&mut input, &mut out)? {
                    copy_i32(&mut input, &mut out)?;
                    copy_i32(&mut input, &mut out)?;
                }
            }
        }
        Ok(finish(input, out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// v1 -> v2
// ─────────────────────────────────────────────────────────────────────────────

/// Inserts an empty struct table; the rest of the layout is unchanged
pub struct AddStructTable;

impl Migration for AddStructTable {
    fn name(&self) -> &'static str {
        "add-struct-table"
    }

    fn applies(&self, version: i32, total_len: usize) -> bool {
        version == 1 && total_len >= MIN_LENGTH
    }

    fn migrate(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        let (input, mut out) = start(&input, 2)?;
        out.count(0);
        Ok(finish(input, out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// v2 -> v3
// ─────────────────────────────────────────────────────────────────────────────

/// Gives every wire an empty relay list
pub struct AddWireRelays;

impl Migration for AddWireRelays {
    fn name(&self) -> &'static str {
        "add-wire-relays"
    }

    fn applies(&self, version: i32, total_len: usize) -> bool {
        version == 2 && total_len >= MIN_LENGTH
    }

    fn migrate(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        let (mut input, mut out) = start(&input, 3)?;
        copy_definitions(&mut input, &mut out)?;

        for _ in 0..copy_count(&mut input, &mut out)? {
            copy_string(&mut input, &mut out)?;
            out.u8(input.u8()?);
            out.blob(&input.blob()?);
            copy_f64(&mut input, &mut out)?;
            copy_f64(&mut input, &mut out)?;
            for _ in 0..copy_count(&mut input, &mut out)? {
                for _ in 0..copy_count(&mut input, &mut out)? {
                    copy_i32(&mut input, &mut out)?;
                    copy_i32(&mut input, &mut out)?;
                    out.count(0);
                }
            }
        }
        Ok(finish(input, out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// v3 -> v4
// ─────────────────────────────────────────────────────────────────────────────

/// Prefixes every node payload with an empty inset table
pub struct AddInputInsets;

impl Migration for AddInputInsets {
    fn name(&self) -> &'static str {
        "add-input-insets"
    }

    fn applies(&self, version: i32, total_len: usize) -> bool {
        version == 3 && total_len >= MIN_LENGTH
    }

    fn migrate(&self, input: Bytes) -> Result<Bytes, DecodeError> {
        let (mut input, mut out) = start(&input, 4)?;
        copy_definitions(&mut input, &mut out)?;

        for _ in 0..copy_count(&mut input, &mut out)? {
            copy_string(&mut input, &mut out)?;
            out.u8(input.u8()?);
            let mut payload = Writer::new();
            payload.count(0);
            payload.raw(&input.blob()?);
            out.blob(&payload.finish());
            copy_f64(&mut input, &mut out)?;
            copy_f64(&mut input, &mut out)?;
            for _ in 0..copy_count(&mut input, &mut out)? {
                for _ in 0..copy_count(&mut input, &mut out)? {
                    copy_i32(&mut input, &mut out)?;
                    copy_i32(&mut input, &mut out)?;
                    for _ in 0..copy_count(&mut input, &mut out)? {
                        copy_f64(&mut input, &mut out)?;
                        copy_f64(&mut input, &mut out)?;
                    }
                }
            }
        }
        Ok(finish(input, out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
