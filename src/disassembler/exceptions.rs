//! Exception region decoding for dynamic method bodies.
//!
//! Regions arrive in one of two legacy binary header shapes, selected by a
//! flag bit in the first byte, or as precomputed descriptors when the
//! emitting runtime never serialized a header. Both header shapes replicate
//! the emitting runtime's own count derivation bit for bit, including its
//! arithmetic quirks; the decoder consumes exactly the declared count and
//! nothing more.
//!
//! Boundary offsets are resolved against the already-decoded instruction
//! list: region starts must land exactly on an instruction, region ends
//! resolve to the next instruction or the end-of-body sentinel.

use crate::{
    devirt::resolver::{CilSymbol, SymbolResolver},
    file::parser::Parser,
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags},
        module::SymbolRef,
    },
    runtime::PendingRegions,
    Result,
};

/// Fat-shape discriminator bit in the first header byte.
const FAT_FORMAT: u8 = 0x40;

/// Offset→instruction-index lookup over the sorted instruction start
/// offsets of one decoded body.
pub struct OffsetIndex<'a> {
    offsets: &'a [u32],
}

impl<'a> OffsetIndex<'a> {
    /// Build a lookup over sorted instruction start offsets.
    #[must_use]
    pub fn new(offsets: &'a [u32]) -> Self {
        OffsetIndex { offsets }
    }

    /// Index of the instruction starting exactly at `offset`.
    ///
    /// # Errors
    /// Returns an error if no instruction starts at that offset; used for
    /// boundaries that must land on instruction starts.
    pub fn exact(&self, offset: u32) -> Result<usize> {
        self.exact_opt(offset).ok_or_else(|| {
            malformed_error!("No instruction starts at offset 0x{:X}", offset)
        })
    }

    /// Index of the instruction starting exactly at `offset`, if any.
    #[must_use]
    pub fn exact_opt(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    /// Index of the first instruction at or after `offset`, or the
    /// end-of-body sentinel.
    #[must_use]
    pub fn at_or_after(&self, offset: u32) -> usize {
        self.offsets.partition_point(|&start| start < offset)
    }

    /// The end-of-body sentinel (one past the last instruction).
    #[must_use]
    pub fn end(&self) -> usize {
        self.offsets.len()
    }
}

/// Decode a raw binary exception header.
///
/// # Errors
/// Returns an error on truncation, on a region start not landing on an
/// instruction boundary, or if a catch-type token resolution faults.
pub fn decode_header(
    header: &[u8],
    offsets: &OffsetIndex<'_>,
    resolver: &SymbolResolver<'_>,
) -> Result<Vec<ExceptionHandler>> {
    if header.is_empty() {
        return Ok(Vec::new());
    }

    let mut parser = Parser::new(header);
    let first = parser.read_le::<u8>()?;
    if first & FAT_FORMAT == 0 {
        decode_compact(&mut parser, offsets, resolver)
    } else {
        parser.seek(0)?;
        decode_fat(&mut parser, offsets, resolver)
    }
}

/// Compact shape: count byte encodes `count * 12 + 2`; the emitting
/// runtime derives the count as `(byte - 2) / 12` in widened arithmetic
/// truncated to `u16`, which we replicate exactly.
fn decode_compact(
    parser: &mut Parser<'_>,
    offsets: &OffsetIndex<'_>,
    resolver: &SymbolResolver<'_>,
) -> Result<Vec<ExceptionHandler>> {
    let count_byte = parser.read_le::<u8>()?;
    let count = ((i32::from(count_byte) - 2) / 12) as u16;
    let _reserved = parser.read_le::<i16>()?;

    let mut handlers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let flags = ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u16>()?);

        let try_offset = u32::from(parser.read_le::<u16>()?);
        let try_delta = parser.read_le::<i8>()?;
        let try_start = offsets.exact(try_offset)?;
        let try_end = offsets.at_or_after(try_offset.wrapping_add_signed(i32::from(try_delta)));

        let handler_offset = u32::from(parser.read_le::<u16>()?);
        let handler_delta = parser.read_le::<i8>()?;
        let handler_start = offsets.exact(handler_offset)?;
        let handler_end =
            offsets.at_or_after(handler_offset.wrapping_add_signed(i32::from(handler_delta)));

        let extra = parser.read_le::<u32>()?;
        handlers.push(build_handler(
            flags,
            try_start,
            try_end,
            handler_start,
            handler_end,
            extra,
            offsets,
            resolver,
        )?);
    }

    Ok(handlers)
}

/// Fat shape: the first little-endian dword holds the flag byte plus a
/// 24-bit section length; count is `((dword >> 8) - 4) / 24` in wrapping
/// unsigned arithmetic truncated to `u16`.
fn decode_fat(
    parser: &mut Parser<'_>,
    offsets: &OffsetIndex<'_>,
    resolver: &SymbolResolver<'_>,
) -> Result<Vec<ExceptionHandler>> {
    let dword = parser.read_le::<u32>()?;
    let count = ((dword >> 8).wrapping_sub(4) / 24) as u16;

    let mut handlers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let flags = ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<i32>()? as u16);

        let try_offset = parser.read_le::<i32>()? as u32;
        let try_length = parser.read_le::<i32>()?;
        let try_start = offsets.exact(try_offset)?;
        let try_end = offsets.at_or_after(try_offset.wrapping_add_signed(try_length));

        let handler_offset = parser.read_le::<i32>()? as u32;
        let handler_length = parser.read_le::<i32>()?;
        let handler_start = offsets.exact(handler_offset)?;
        let handler_end = offsets.at_or_after(handler_offset.wrapping_add_signed(handler_length));

        let extra = parser.read_le::<u32>()?;
        handlers.push(build_handler(
            flags,
            try_start,
            try_end,
            handler_start,
            handler_end,
            extra,
            offsets,
            resolver,
        )?);
    }

    Ok(handlers)
}

/// Interpret the kind-dependent trailing dword and assemble the handler.
#[allow(clippy::too_many_arguments)]
fn build_handler(
    flags: ExceptionHandlerFlags,
    try_start: usize,
    try_end: usize,
    handler_start: usize,
    handler_end: usize,
    extra: u32,
    offsets: &OffsetIndex<'_>,
    resolver: &SymbolResolver<'_>,
) -> Result<ExceptionHandler> {
    let mut catch_type = None;
    let mut filter_start = None;
    if flags == ExceptionHandlerFlags::EXCEPTION {
        // Like every other token in the stream, the catch type indexes the
        // opaque token list; an unresolvable one leaves the clause untyped.
        if let Some(CilSymbol::Symbol(SymbolRef::Type(token))) = resolver.resolve(extra)? {
            catch_type = Some(token);
        }
    } else if flags.contains(ExceptionHandlerFlags::FILTER) {
        filter_start = offsets.exact_opt(extra);
    }

    Ok(ExceptionHandler {
        flags,
        try_start,
        try_end,
        handler_start,
        handler_end,
        catch_type,
        filter_start,
    })
}

/// Decode precomputed region descriptors.
///
/// Emits one handler per pending clause. Finally clauses close their try
/// range at the descriptor's end-of-finally offset (end of body when
/// absent); every other kind shares the descriptor's try end. Filter
/// starts are never populated in this path.
///
/// # Errors
/// Returns an error on a boundary not landing on an instruction start or
/// if a catch-type import faults.
pub fn decode_regions(
    regions: &[PendingRegions],
    offsets: &OffsetIndex<'_>,
    resolver: &SymbolResolver<'_>,
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();
    for region in regions {
        let try_start = offsets.exact(region.try_start)?;
        let shared_try_end = offsets.at_or_after(region.try_end);
        let finally_try_end = match region.end_finally {
            Some(offset) => offsets.at_or_after(offset),
            None => offsets.end(),
        };

        for clause in &region.clauses {
            let flags = ExceptionHandlerFlags::from_bits_truncate(clause.kind as u16);
            let try_end = if flags.contains(ExceptionHandlerFlags::FINALLY) {
                finally_try_end
            } else {
                shared_try_end
            };

            let catch_type = match clause.catch_type {
                Some(handle) if flags == ExceptionHandlerFlags::EXCEPTION => {
                    Some(resolver.import_type(handle)?)
                }
                _ => None,
            };

            handlers.push(ExceptionHandler {
                flags,
                try_start,
                try_end,
                handler_start: offsets.exact(clause.handler_start)?,
                handler_end: offsets.at_or_after(clause.handler_end),
                catch_type,
                filter_start: None,
            });
        }
    }

    Ok(handlers)
}
