//! The fixed CIL opcode tables (ECMA-335 III).
//!
//! Two-byte opcodes are keyed as `0xFExx`. Reserved encodings are simply
//! absent from the table; [`lookup`] returns `None` for them and the decoder
//! turns that into a malformed-stream error.

use crate::disassembler::instruction::{OpCode, OperandKind};

macro_rules! define_opcodes {
    ($( ($const:ident, $mnemonic:literal, $value:literal, $kind:ident) ),+ $(,)?) => {
        $(
            #[doc = concat!("`", $mnemonic, "`")]
            pub static $const: OpCode = OpCode {
                mnemonic: $mnemonic,
                value: $value,
                operand: OperandKind::$kind,
            };
        )+

        /// Look up an opcode table entry by its encoded value.
        ///
        /// `0xFE`-prefixed opcodes are keyed with the prefix in the high
        /// byte. Returns `None` for reserved or undefined encodings.
        #[must_use]
        pub fn lookup(value: u16) -> Option<&'static OpCode> {
            match value {
                $( $value => Some(&$const), )+
                _ => None,
            }
        }
    };
}

define_opcodes!(
    (NOP, "nop", 0x00, None),
    (BREAK, "break", 0x01, None),
    (LDARG_0, "ldarg.0", 0x02, None),
    (LDARG_1, "ldarg.1", 0x03, None),
    (LDARG_2, "ldarg.2", 0x04, None),
    (LDARG_3, "ldarg.3", 0x05, None),
    (LDLOC_0, "ldloc.0", 0x06, None),
    (LDLOC_1, "ldloc.1", 0x07, None),
    (LDLOC_2, "ldloc.2", 0x08, None),
    (LDLOC_3, "ldloc.3", 0x09, None),
    (STLOC_0, "stloc.0", 0x0A, None),
    (STLOC_1, "stloc.1", 0x0B, None),
    (STLOC_2, "stloc.2", 0x0C, None),
    (STLOC_3, "stloc.3", 0x0D, None),
    (LDARG_S, "ldarg.s", 0x0E, ArgumentShort),
    (LDARGA_S, "ldarga.s", 0x0F, ArgumentShort),
    (STARG_S, "starg.s", 0x10, ArgumentShort),
    (LDLOC_S, "ldloc.s", 0x11, LocalShort),
    (LDLOCA_S, "ldloca.s", 0x12, LocalShort),
    (STLOC_S, "stloc.s", 0x13, LocalShort),
    (LDNULL, "ldnull", 0x14, None),
    (LDC_I4_M1, "ldc.i4.m1", 0x15, None),
    (LDC_I4_0, "ldc.i4.0", 0x16, None),
    (LDC_I4_1, "ldc.i4.1", 0x17, None),
    (LDC_I4_2, "ldc.i4.2", 0x18, None),
    (LDC_I4_3, "ldc.i4.3", 0x19, None),
    (LDC_I4_4, "ldc.i4.4", 0x1A, None),
    (LDC_I4_5, "ldc.i4.5", 0x1B, None),
    (LDC_I4_6, "ldc.i4.6", 0x1C, None),
    (LDC_I4_7, "ldc.i4.7", 0x1D, None),
    (LDC_I4_8, "ldc.i4.8", 0x1E, None),
    (LDC_I4_S, "ldc.i4.s", 0x1F, Int8),
    (LDC_I4, "ldc.i4", 0x20, Int32),
    (LDC_I8, "ldc.i8", 0x21, Int64),
    (LDC_R4, "ldc.r4", 0x22, Float32),
    (LDC_R8, "ldc.r8", 0x23, Float64),
    (DUP, "dup", 0x25, None),
    (POP, "pop", 0x26, None),
    (JMP, "jmp", 0x27, Method),
    (CALL, "call", 0x28, Method),
    (CALLI, "calli", 0x29, Signature),
    (RET, "ret", 0x2A, None),
    (BR_S, "br.s", 0x2B, BranchShort),
    (BRFALSE_S, "brfalse.s", 0x2C, BranchShort),
    (BRTRUE_S, "brtrue.s", 0x2D, BranchShort),
    (BEQ_S, "beq.s", 0x2E, BranchShort),
    (BGE_S, "bge.s", 0x2F, BranchShort),
    (BGT_S, "bgt.s", 0x30, BranchShort),
    (BLE_S, "ble.s", 0x31, BranchShort),
    (BLT_S, "blt.s", 0x32, BranchShort),
    (BNE_UN_S, "bne.un.s", 0x33, BranchShort),
    (BGE_UN_S, "bge.un.s", 0x34, BranchShort),
    (BGT_UN_S, "bgt.un.s", 0x35, BranchShort),
    (BLE_UN_S, "ble.un.s", 0x36, BranchShort),
    (BLT_UN_S, "blt.un.s", 0x37, BranchShort),
    (BR, "br", 0x38, Branch),
    (BRFALSE, "brfalse", 0x39, Branch),
    (BRTRUE, "brtrue", 0x3A, Branch),
    (BEQ, "beq", 0x3B, Branch),
    (BGE, "bge", 0x3C, Branch),
    (BGT, "bgt", 0x3D, Branch),
    (BLE, "ble", 0x3E, Branch),
    (BLT, "blt", 0x3F, Branch),
    (BNE_UN, "bne.un", 0x40, Branch),
    (BGE_UN, "bge.un", 0x41, Branch),
    (BGT_UN, "bgt.un", 0x42, Branch),
    (BLE_UN, "ble.un", 0x43, Branch),
    (BLT_UN, "blt.un", 0x44, Branch),
    (SWITCH, "switch", 0x45, Switch),
    (LDIND_I1, "ldind.i1", 0x46, None),
    (LDIND_U1, "ldind.u1", 0x47, None),
    (LDIND_I2, "ldind.i2", 0x48, None),
    (LDIND_U2, "ldind.u2", 0x49, None),
    (LDIND_I4, "ldind.i4", 0x4A, None),
    (LDIND_U4, "ldind.u4", 0x4B, None),
    (LDIND_I8, "ldind.i8", 0x4C, None),
    (LDIND_I, "ldind.i", 0x4D, None),
    (LDIND_R4, "ldind.r4", 0x4E, None),
    (LDIND_R8, "ldind.r8", 0x4F, None),
    (LDIND_REF, "ldind.ref", 0x50, None),
    (STIND_REF, "stind.ref", 0x51, None),
    (STIND_I1, "stind.i1", 0x52, None),
    (STIND_I2, "stind.i2", 0x53, None),
    (STIND_I4, "stind.i4", 0x54, None),
    (STIND_I8, "stind.i8", 0x55, None),
    (STIND_R4, "stind.r4", 0x56, None),
    (STIND_R8, "stind.r8", 0x57, None),
    (ADD, "add", 0x58, None),
    (SUB, "sub", 0x59, None),
    (MUL, "mul", 0x5A, None),
    (DIV, "div", 0x5B, None),
    (DIV_UN, "div.un", 0x5C, None),
    (REM, "rem", 0x5D, None),
    (REM_UN, "rem.un", 0x5E, None),
    (AND, "and", 0x5F, None),
    (OR, "or", 0x60, None),
    (XOR, "xor", 0x61, None),
    (SHL, "shl", 0x62, None),
    (SHR, "shr", 0x63, None),
    (SHR_UN, "shr.un", 0x64, None),
    (NEG, "neg", 0x65, None),
    (NOT, "not", 0x66, None),
    (CONV_I1, "conv.i1", 0x67, None),
    (CONV_I2, "conv.i2", 0x68, None),
    (CONV_I4, "conv.i4", 0x69, None),
    (CONV_I8, "conv.i8", 0x6A, None),
    (CONV_R4, "conv.r4", 0x6B, None),
    (CONV_R8, "conv.r8", 0x6C, None),
    (CONV_U4, "conv.u4", 0x6D, None),
    (CONV_U8, "conv.u8", 0x6E, None),
    (CALLVIRT, "callvirt", 0x6F, Method),
    (CPOBJ, "cpobj", 0x70, Type),
    (LDOBJ, "ldobj", 0x71, Type),
    (LDSTR, "ldstr", 0x72, String),
    (NEWOBJ, "newobj", 0x73, Method),
    (CASTCLASS, "castclass", 0x74, Type),
    (ISINST, "isinst", 0x75, Type),
    (CONV_R_UN, "conv.r.un", 0x76, None),
    (UNBOX, "unbox", 0x79, Type),
    (THROW, "throw", 0x7A, None),
    (LDFLD, "ldfld", 0x7B, Field),
    (LDFLDA, "ldflda", 0x7C, Field),
    (STFLD, "stfld", 0x7D, Field),
    (LDSFLD, "ldsfld", 0x7E, Field),
    (LDSFLDA, "ldsflda", 0x7F, Field),
    (STSFLD, "stsfld", 0x80, Field),
    (STOBJ, "stobj", 0x81, Type),
    (CONV_OVF_I1_UN, "conv.ovf.i1.un", 0x82, None),
    (CONV_OVF_I2_UN, "conv.ovf.i2.un", 0x83, None),
    (CONV_OVF_I4_UN, "conv.ovf.i4.un", 0x84, None),
    (CONV_OVF_I8_UN, "conv.ovf.i8.un", 0x85, None),
    (CONV_OVF_U1_UN, "conv.ovf.u1.un", 0x86, None),
    (CONV_OVF_U2_UN, "conv.ovf.u2.un", 0x87, None),
    (CONV_OVF_U4_UN, "conv.ovf.u4.un", 0x88, None),
    (CONV_OVF_U8_UN, "conv.ovf.u8.un", 0x89, None),
    (CONV_OVF_I_UN, "conv.ovf.i.un", 0x8A, None),
    (CONV_OVF_U_UN, "conv.ovf.u.un", 0x8B, None),
    (BOX, "box", 0x8C, Type),
    (NEWARR, "newarr", 0x8D, Type),
    (LDLEN, "ldlen", 0x8E, None),
    (LDELEMA, "ldelema", 0x8F, Type),
    (LDELEM_I1, "ldelem.i1", 0x90, None),
    (LDELEM_U1, "ldelem.u1", 0x91, None),
    (LDELEM_I2, "ldelem.i2", 0x92, None),
    (LDELEM_U2, "ldelem.u2", 0x93, None),
    (LDELEM_I4, "ldelem.i4", 0x94, None),
    (LDELEM_U4, "ldelem.u4", 0x95, None),
    (LDELEM_I8, "ldelem.i8", 0x96, None),
    (LDELEM_I, "ldelem.i", 0x97, None),
    (LDELEM_R4, "ldelem.r4", 0x98, None),
    (LDELEM_R8, "ldelem.r8", 0x99, None),
    (LDELEM_REF, "ldelem.ref", 0x9A, None),
    (STELEM_I, "stelem.i", 0x9B, None),
    (STELEM_I1, "stelem.i1", 0x9C, None),
    (STELEM_I2, "stelem.i2", 0x9D, None),
    (STELEM_I4, "stelem.i4", 0x9E, None),
    (STELEM_I8, "stelem.i8", 0x9F, None),
    (STELEM_R4, "stelem.r4", 0xA0, None),
    (STELEM_R8, "stelem.r8", 0xA1, None),
    (STELEM_REF, "stelem.ref", 0xA2, None),
    (LDELEM, "ldelem", 0xA3, Type),
    (STELEM, "stelem", 0xA4, Type),
    (UNBOX_ANY, "unbox.any", 0xA5, Type),
    (CONV_OVF_I1, "conv.ovf.i1", 0xB3, None),
    (CONV_OVF_U1, "conv.ovf.u1", 0xB4, None),
    (CONV_OVF_I2, "conv.ovf.i2", 0xB5, None),
    (CONV_OVF_U2, "conv.ovf.u2", 0xB6, None),
    (CONV_OVF_I4, "conv.ovf.i4", 0xB7, None),
    (CONV_OVF_U4, "conv.ovf.u4", 0xB8, None),
    (CONV_OVF_I8, "conv.ovf.i8", 0xB9, None),
    (CONV_OVF_U8, "conv.ovf.u8", 0xBA, None),
    (REFANYVAL, "refanyval", 0xC2, Type),
    (CKFINITE, "ckfinite", 0xC3, None),
    (MKREFANY, "mkrefany", 0xC6, Type),
    (LDTOKEN, "ldtoken", 0xD0, Token),
    (CONV_U2, "conv.u2", 0xD1, None),
    (CONV_U1, "conv.u1", 0xD2, None),
    (CONV_I, "conv.i", 0xD3, None),
    (CONV_OVF_I, "conv.ovf.i", 0xD4, None),
    (CONV_OVF_U, "conv.ovf.u", 0xD5, None),
    (ADD_OVF, "add.ovf", 0xD6, None),
    (ADD_OVF_UN, "add.ovf.un", 0xD7, None),
    (MUL_OVF, "mul.ovf", 0xD8, None),
    (MUL_OVF_UN, "mul.ovf.un", 0xD9, None),
    (SUB_OVF, "sub.ovf", 0xDA, None),
    (SUB_OVF_UN, "sub.ovf.un", 0xDB, None),
    (ENDFINALLY, "endfinally", 0xDC, None),
    (LEAVE, "leave", 0xDD, Branch),
    (LEAVE_S, "leave.s", 0xDE, BranchShort),
    (STIND_I, "stind.i", 0xDF, None),
    (CONV_U, "conv.u", 0xE0, None),
    // 0xFE-prefixed opcodes
    (ARGLIST, "arglist", 0xFE00, None),
    (CEQ, "ceq", 0xFE01, None),
    (CGT, "cgt", 0xFE02, None),
    (CGT_UN, "cgt.un", 0xFE03, None),
    (CLT, "clt", 0xFE04, None),
    (CLT_UN, "clt.un", 0xFE05, None),
    (LDFTN, "ldftn", 0xFE06, Method),
    (LDVIRTFTN, "ldvirtftn", 0xFE07, Method),
    (LDARG, "ldarg", 0xFE09, Argument),
    (LDARGA, "ldarga", 0xFE0A, Argument),
    (STARG, "starg", 0xFE0B, Argument),
    (LDLOC, "ldloc", 0xFE0C, Local),
    (LDLOCA, "ldloca", 0xFE0D, Local),
    (STLOC, "stloc", 0xFE0E, Local),
    (LOCALLOC, "localloc", 0xFE0F, None),
    (ENDFILTER, "endfilter", 0xFE11, None),
    (UNALIGNED, "unaligned.", 0xFE12, Int8),
    (VOLATILE, "volatile.", 0xFE13, None),
    (TAIL, "tail.", 0xFE14, None),
    (INITOBJ, "initobj", 0xFE15, Type),
    (CONSTRAINED, "constrained.", 0xFE16, Type),
    (CPBLK, "cpblk", 0xFE17, None),
    (INITBLK, "initblk", 0xFE18, None),
    (NO, "no.", 0xFE19, Int8),
    (RETHROW, "rethrow", 0xFE1A, None),
    (SIZEOF, "sizeof", 0xFE1C, Type),
    (REFANYTYPE, "refanytype", 0xFE1D, None),
    (READONLY, "readonly.", 0xFE1E, None),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_single_byte() {
        assert_eq!(lookup(0x2A).unwrap().mnemonic, "ret");
        assert_eq!(lookup(0x28).unwrap().mnemonic, "call");
        assert_eq!(lookup(0x72).unwrap().operand, OperandKind::String);
    }

    #[test]
    fn lookup_prefixed() {
        assert_eq!(lookup(0xFE01).unwrap().mnemonic, "ceq");
        assert_eq!(lookup(0xFE0C).unwrap().operand, OperandKind::Local);
        assert_eq!(lookup(0xFE19).unwrap().mnemonic, "no.");
        assert_eq!(lookup(0xFE19).unwrap().operand, OperandKind::Int8);
    }

    #[test]
    fn lookup_reserved() {
        // 0x24 and FE 0x08 are reserved encodings
        assert!(lookup(0x24).is_none());
        assert!(lookup(0xFE08).is_none());
        assert!(lookup(0xFEFF).is_none());
    }

    #[test]
    fn opcode_lengths() {
        assert_eq!(RET.len(), 1);
        assert_eq!(CEQ.len(), 2);
    }
}
