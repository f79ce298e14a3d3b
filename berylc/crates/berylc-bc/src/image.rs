//! Binary image serialization.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! header   : magic "BRLB" | version "0001" | crc:u16 | total_size:u32
//! section* : ident[8] | size:u32 | payload...
//! ```
//!
//! The `IREP` section holds the root record; each record is
//!
//! ```text
//! record_size:u32 nlocals:u16 nregs:u16 nchildren:u16
//! ilen:u32 iseq:u32[ilen]
//! plen:u32 (tt:u8 len:u16 bytes)*
//! slen:u32 (len:u16 bytes \0)*
//! ```
//!
//! followed by `nchildren` child records depth-first. The optional `LINE`
//! section carries per-instruction line tables in the same depth-first
//! order, and `DBG` a filename table. The image ends with an `END`
//! sentinel section.
//!
//! The header CRC (CCITT-16, polynomial 0x11021, initial value 0) covers
//! every byte after the CRC field through end-of-file and must verify
//! before any record is trusted.

use std::rc::Rc;

use berylc_util::SymbolTable;
use log::debug;

use crate::error::{BcError, BcResult};
use crate::insn::Insn;
use crate::irep::{Irep, PoolValue};
use crate::opcode::MAX_OPCODE;

pub const IMAGE_MAGIC: &[u8; 4] = b"BRLB";
pub const IMAGE_VERSION: &[u8; 4] = b"0001";

const SECTION_IREP: &[u8; 8] = b"IREP    ";
const SECTION_LINE: &[u8; 8] = b"LINE    ";
const SECTION_DBG: &[u8; 8] = b"DBG     ";
const SECTION_END: &[u8; 8] = b"END     ";

const HEADER_SIZE: usize = 4 + 4 + 2 + 4;
/// Byte offset of the first byte covered by the CRC.
const CRC_BODY_OFFSET: usize = 4 + 4 + 2;

const POOL_TT_STR: u8 = 0;
const POOL_TT_INT: u8 = 1;
const POOL_TT_FLOAT: u8 = 2;

/// CRC-16-CCITT over `data`, continuing from `crc`.
pub fn crc16_ccitt(data: &[u8], mut crc: u16) -> u16 {
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// ---------------------------------------------------------------------------
// Dump
// ---------------------------------------------------------------------------

/// Serialize an IREP tree into a binary image.
///
/// With `debug_info`, `LINE` and `DBG` sections are emitted so loaded code
/// keeps its source positions.
pub fn dump_irep(irep: &Irep, symtab: &SymbolTable, debug_info: bool) -> BcResult<Vec<u8>> {
    let mut body = Vec::with_capacity(irep.total_len() * 8 + 64);

    let mut irep_payload = Vec::new();
    write_record(&mut irep_payload, irep, symtab)?;
    write_section(&mut body, SECTION_IREP, &irep_payload);

    if debug_info {
        if irep.lines.len() == irep.iseq.len() && !irep.iseq.is_empty() {
            let mut line_payload = Vec::new();
            write_line_record(&mut line_payload, irep);
            write_section(&mut body, SECTION_LINE, &line_payload);
        }
        let mut filenames = Vec::new();
        collect_filenames(irep, &mut filenames);
        if !filenames.is_empty() {
            let mut dbg_payload = Vec::new();
            write_dbg_payload(&mut dbg_payload, irep, &filenames)?;
            write_section(&mut body, SECTION_DBG, &dbg_payload);
        }
    }

    write_section(&mut body, SECTION_END, &[]);

    let total_size = HEADER_SIZE + body.len();
    let mut image = Vec::with_capacity(total_size);
    image.extend_from_slice(IMAGE_MAGIC);
    image.extend_from_slice(IMAGE_VERSION);
    // crc covers the size field and the body
    let mut crc_input = Vec::with_capacity(4 + body.len());
    crc_input.extend_from_slice(&(total_size as u32).to_be_bytes());
    crc_input.extend_from_slice(&body);
    let crc = crc16_ccitt(&crc_input, 0);
    image.extend_from_slice(&crc.to_be_bytes());
    image.extend_from_slice(&crc_input);
    debug!(
        "dumped image: {} bytes, {} instructions, crc {:#06x}",
        image.len(),
        irep.total_len(),
        crc
    );
    Ok(image)
}

fn write_section(out: &mut Vec<u8>, ident: &[u8; 8], payload: &[u8]) {
    out.extend_from_slice(ident);
    out.extend_from_slice(&((payload.len() + 12) as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

fn write_record(out: &mut Vec<u8>, irep: &Irep, symtab: &SymbolTable) -> BcResult<()> {
    if irep.reps.len() > u16::MAX as usize {
        return Err(BcError::TooLarge {
            what: "children",
            count: irep.reps.len(),
        });
    }
    if irep.iseq.len() > u32::MAX as usize / 4 {
        return Err(BcError::TooLarge {
            what: "instructions",
            count: irep.iseq.len(),
        });
    }

    let record_start = out.len();
    out.extend_from_slice(&0u32.to_be_bytes()); // record_size backpatched below
    out.extend_from_slice(&irep.nlocals.to_be_bytes());
    out.extend_from_slice(&irep.nregs.to_be_bytes());
    out.extend_from_slice(&(irep.reps.len() as u16).to_be_bytes());

    out.extend_from_slice(&(irep.iseq.len() as u32).to_be_bytes());
    for insn in &irep.iseq {
        out.extend_from_slice(&insn.0.to_be_bytes());
    }

    out.extend_from_slice(&(irep.pool.len() as u32).to_be_bytes());
    for entry in &irep.pool {
        let (tt, bytes) = match entry {
            PoolValue::Str(s) => (POOL_TT_STR, s.clone().into_bytes()),
            PoolValue::Int(i) => (POOL_TT_INT, i.to_string().into_bytes()),
            PoolValue::Float(f) => (POOL_TT_FLOAT, format!("{f:?}").into_bytes()),
        };
        if bytes.len() > u16::MAX as usize {
            return Err(BcError::TooLarge {
                what: "pool entry",
                count: bytes.len(),
            });
        }
        out.push(tt);
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&bytes);
    }

    out.extend_from_slice(&(irep.syms.len() as u32).to_be_bytes());
    for sym in &irep.syms {
        let name = symtab.name(*sym).as_bytes();
        if name.len() > u16::MAX as usize - 1 {
            return Err(BcError::TooLarge {
                what: "symbol name",
                count: name.len(),
            });
        }
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out.push(0);
    }

    let record_size = (out.len() - record_start) as u32;
    out[record_start..record_start + 4].copy_from_slice(&record_size.to_be_bytes());

    for child in &irep.reps {
        write_record(out, child, symtab)?;
    }
    Ok(())
}

fn write_line_record(out: &mut Vec<u8>, irep: &Irep) {
    out.extend_from_slice(&(irep.lines.len() as u32).to_be_bytes());
    for line in &irep.lines {
        out.extend_from_slice(&line.to_be_bytes());
    }
    for child in &irep.reps {
        write_line_record(out, child);
    }
}

fn collect_filenames(irep: &Irep, acc: &mut Vec<String>) {
    if let Some(name) = &irep.filename {
        if !acc.contains(name) {
            acc.push(name.clone());
        }
    }
    for child in &irep.reps {
        collect_filenames(child, acc);
    }
}

fn write_dbg_payload(out: &mut Vec<u8>, irep: &Irep, filenames: &[String]) -> BcResult<()> {
    out.extend_from_slice(&(filenames.len() as u16).to_be_bytes());
    for name in filenames {
        if name.len() > u16::MAX as usize {
            return Err(BcError::TooLarge {
                what: "filename",
                count: name.len(),
            });
        }
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    write_dbg_record(out, irep, filenames);
    Ok(())
}

fn write_dbg_record(out: &mut Vec<u8>, irep: &Irep, filenames: &[String]) {
    let idx = irep
        .filename
        .as_ref()
        .and_then(|n| filenames.iter().position(|f| f == n))
        .map(|i| i as u16)
        .unwrap_or(u16::MAX);
    out.extend_from_slice(&idx.to_be_bytes());
    for child in &irep.reps {
        write_dbg_record(out, child, filenames);
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> BcResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(BcError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> BcResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> BcResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> BcResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Deserialize a binary image, verifying the CRC before trusting any
/// record. Symbol names are re-interned into `symtab`; raw ids in the
/// image are never trusted across tables.
pub fn load_irep(bytes: &[u8], symtab: &mut SymbolTable) -> BcResult<Rc<Irep>> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != IMAGE_MAGIC {
        return Err(BcError::BadMagic);
    }
    let version = r.take(4)?;
    if version != IMAGE_VERSION {
        return Err(BcError::BadVersion {
            found: String::from_utf8_lossy(version).into_owned(),
        });
    }
    let expected_crc = r.u16()?;
    let total_size = r.u32()? as usize;
    if total_size > bytes.len() {
        return Err(BcError::Truncated {
            offset: bytes.len(),
            needed: total_size - bytes.len(),
        });
    }
    let actual_crc = crc16_ccitt(&bytes[CRC_BODY_OFFSET..total_size], 0);
    if actual_crc != expected_crc {
        return Err(BcError::CrcMismatch {
            expected: expected_crc,
            actual: actual_crc,
        });
    }

    let mut root: Option<Irep> = None;
    let mut saw_end = false;
    while r.remaining() >= 12 {
        let ident: [u8; 8] = r.take(8)?.try_into().expect("slice length checked");
        let size = r.u32()? as usize;
        if size < 12 {
            return Err(BcError::MalformedSection {
                section: "header",
                reason: format!("section size {size} below header size"),
            });
        }
        let payload = r.take(size - 12)?;
        match &ident {
            id if id == SECTION_IREP => {
                let mut pr = Reader::new(payload);
                root = Some(read_record(&mut pr, symtab)?);
            }
            id if id == SECTION_LINE => {
                if let Some(irep) = root.as_mut() {
                    let mut pr = Reader::new(payload);
                    read_line_record(&mut pr, irep)?;
                }
            }
            id if id == SECTION_DBG => {
                if let Some(irep) = root.as_mut() {
                    let mut pr = Reader::new(payload);
                    read_dbg_payload(&mut pr, irep)?;
                }
            }
            id if id == SECTION_END => {
                saw_end = true;
                break;
            }
            other => {
                // unknown sections are skipped so newer writers stay readable
                debug!(
                    "skipping unknown image section {:?}",
                    String::from_utf8_lossy(other)
                );
            }
        }
    }
    if !saw_end {
        return Err(BcError::MissingEnd);
    }

    let root = root.ok_or(BcError::MalformedSection {
        section: "IREP",
        reason: "image has no IREP section".into(),
    })?;
    Ok(Rc::new(root))
}

fn read_record(r: &mut Reader<'_>, symtab: &mut SymbolTable) -> BcResult<Irep> {
    let record_start = r.pos;
    let record_size = r.u32()? as usize;

    let nlocals = r.u16()?;
    let nregs = r.u16()?;
    let nchildren = r.u16()? as usize;

    let ilen = r.u32()? as usize;
    let mut iseq = Vec::with_capacity(ilen);
    for _ in 0..ilen {
        let word = r.u32()?;
        if (word & 0x7f) as u8 > MAX_OPCODE {
            return Err(BcError::MalformedSection {
                section: "IREP",
                reason: format!("invalid opcode in instruction {word:#010x}"),
            });
        }
        iseq.push(Insn(word));
    }

    let plen = r.u32()? as usize;
    let mut pool = Vec::with_capacity(plen);
    for _ in 0..plen {
        let tt = r.u8()?;
        let len = r.u16()? as usize;
        let raw = r.take(len)?;
        let text = std::str::from_utf8(raw).map_err(|_| BcError::MalformedSection {
            section: "IREP",
            reason: "pool entry is not UTF-8".into(),
        })?;
        let value = match tt {
            POOL_TT_STR => PoolValue::Str(text.to_owned()),
            POOL_TT_INT => PoolValue::Int(text.parse().map_err(|_| BcError::MalformedSection {
                section: "IREP",
                reason: format!("bad integer literal {text:?}"),
            })?),
            POOL_TT_FLOAT => {
                PoolValue::Float(text.parse().map_err(|_| BcError::MalformedSection {
                    section: "IREP",
                    reason: format!("bad float literal {text:?}"),
                })?)
            }
            other => {
                return Err(BcError::MalformedSection {
                    section: "IREP",
                    reason: format!("unknown pool tag {other}"),
                })
            }
        };
        pool.push(value);
    }

    let slen = r.u32()? as usize;
    let mut syms = Vec::with_capacity(slen);
    for _ in 0..slen {
        let len = r.u16()? as usize;
        let raw = r.take(len)?;
        let name = std::str::from_utf8(raw).map_err(|_| BcError::MalformedSection {
            section: "IREP",
            reason: "symbol name is not UTF-8".into(),
        })?;
        syms.push(symtab.intern(name));
        let nul = r.u8()?;
        if nul != 0 {
            return Err(BcError::MalformedSection {
                section: "IREP",
                reason: "symbol name missing terminator".into(),
            });
        }
    }

    if r.pos - record_start != record_size {
        return Err(BcError::MalformedSection {
            section: "IREP",
            reason: format!(
                "record size mismatch: declared {record_size}, read {}",
                r.pos - record_start
            ),
        });
    }

    let mut reps = Vec::with_capacity(nchildren);
    for _ in 0..nchildren {
        reps.push(Rc::new(read_record(r, symtab)?));
    }

    Ok(Irep {
        nlocals,
        nregs,
        iseq,
        pool,
        syms,
        reps,
        lines: Vec::new(),
        filename: None,
    })
}

fn read_line_record(r: &mut Reader<'_>, irep: &mut Irep) -> BcResult<()> {
    let len = r.u32()? as usize;
    let mut lines = Vec::with_capacity(len);
    for _ in 0..len {
        lines.push(r.u16()?);
    }
    irep.lines = lines;
    for child in &mut irep.reps {
        let child = Rc::get_mut(child).ok_or(BcError::MalformedSection {
            section: "LINE",
            reason: "irep already shared during load".into(),
        })?;
        read_line_record(r, child)?;
    }
    Ok(())
}

fn read_dbg_payload(r: &mut Reader<'_>, irep: &mut Irep) -> BcResult<()> {
    let count = r.u16()? as usize;
    let mut filenames = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.u16()? as usize;
        let raw = r.take(len)?;
        filenames.push(
            std::str::from_utf8(raw)
                .map_err(|_| BcError::MalformedSection {
                    section: "DBG",
                    reason: "filename is not UTF-8".into(),
                })?
                .to_owned(),
        );
    }
    read_dbg_record(r, irep, &filenames)
}

fn read_dbg_record(r: &mut Reader<'_>, irep: &mut Irep, filenames: &[String]) -> BcResult<()> {
    let idx = r.u16()?;
    if idx != u16::MAX {
        irep.filename = filenames.get(idx as usize).cloned();
    }
    for child in &mut irep.reps {
        let child = Rc::get_mut(child).ok_or(BcError::MalformedSection {
            section: "DBG",
            reason: "irep already shared during load".into(),
        })?;
        read_dbg_record(r, child, filenames)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    fn sample_irep(symtab: &mut SymbolTable) -> Irep {
        let child = Irep {
            nlocals: 1,
            nregs: 3,
            iseq: vec![
                Insn::ax(OpCode::Enter, 0),
                Insn::a(OpCode::Loadnil, 1),
                Insn::ab(OpCode::Return, 1, 0),
            ],
            pool: vec![],
            syms: vec![symtab.intern("inner")],
            reps: vec![],
            lines: vec![2, 2, 2],
            filename: Some("sample.rb".into()),
        };
        Irep {
            nlocals: 2,
            nregs: 6,
            iseq: vec![
                Insn::abx(OpCode::String, 2, 0),
                Insn::asbx(OpCode::Loadi, 3, -5),
                Insn::abx(OpCode::Loadl, 4, 1),
                Insn::abc(OpCode::Send, 2, 0, 2),
                Insn::ab(OpCode::Return, 2, 0),
            ],
            pool: vec![
                PoolValue::Str("hello".into()),
                PoolValue::Float(2.5),
                PoolValue::Int(99),
            ],
            syms: vec![symtab.intern("greet"), symtab.intern("x")],
            reps: vec![Rc::new(child)],
            lines: vec![1, 1, 1, 1, 1],
            filename: Some("sample.rb".into()),
        }
    }

    #[test]
    fn test_dump_load_round_trip() {
        let mut symtab = SymbolTable::new();
        let irep = sample_irep(&mut symtab);
        let image = dump_irep(&irep, &symtab, true).unwrap();

        let mut fresh = SymbolTable::new();
        let loaded = load_irep(&image, &mut fresh).unwrap();
        assert!(irep.bytecode_eq(&loaded));
        assert_eq!(loaded.lines, irep.lines);
        assert_eq!(loaded.filename.as_deref(), Some("sample.rb"));
        assert_eq!(fresh.name(loaded.syms[0]), "greet");
    }

    #[test]
    fn test_round_trip_without_debug_info() {
        let mut symtab = SymbolTable::new();
        let irep = sample_irep(&mut symtab);
        let image = dump_irep(&irep, &symtab, false).unwrap();
        let loaded = load_irep(&image, &mut symtab).unwrap();
        assert!(irep.bytecode_eq(&loaded));
        assert!(loaded.lines.is_empty());
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut symtab = SymbolTable::new();
        let irep = sample_irep(&mut symtab);
        let mut image = dump_irep(&irep, &symtab, false).unwrap();
        let last = image.len() - 13;
        image[last] ^= 0x40;
        match load_irep(&image, &mut symtab) {
            Err(BcError::CrcMismatch { .. }) => {}
            other => panic!("expected CRC mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut symtab = SymbolTable::new();
        let mut image = dump_irep(&sample_irep(&mut symtab), &symtab, false).unwrap();
        image[0] = b'X';
        assert!(matches!(
            load_irep(&image, &mut symtab),
            Err(BcError::BadMagic)
        ));
    }

    #[test]
    fn test_truncated_rejected() {
        let mut symtab = SymbolTable::new();
        let image = dump_irep(&sample_irep(&mut symtab), &symtab, false).unwrap();
        let cut = &image[..image.len() / 2];
        assert!(load_irep(cut, &mut symtab).is_err());
    }

    #[test]
    fn test_crc_known_vector() {
        // CRC-16/XMODEM of "123456789"
        assert_eq!(crc16_ccitt(b"123456789", 0), 0x31c3);
    }
}
