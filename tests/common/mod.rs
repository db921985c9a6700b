//! In-memory fixture builders shared by the integration tests.
#![allow(dead_code)]

pub const TEXT_ADDR: u64 = 0x401000;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_GNU_STACK: u32 = 0x6474e551;
pub const PT_GNU_RELRO: u32 = 0x6474e552;
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub const DT_FLAGS: u64 = 30;
pub const DT_FLAGS_1: u64 = 0x6ffffffb;
pub const DF_BIND_NOW: u64 = 0x8;
pub const DF_1_PIE: u64 = 0x0800_0000;

/// x86-64 function compiled with `-fstack-protector`: loads the guard from
/// `fs:0x28`, then checks it with `sub rdx, fs:0x28` before `leave; ret`.
pub const PROTECTED_FN: [u8; 45] = [
    0x55, // push rbp
    0x48, 0x89, 0xe5, // mov rbp, rsp
    0x48, 0x83, 0xec, 0x20, // sub rsp, 0x20
    0x64, 0x48, 0x8b, 0x04, 0x25, 0x28, 0x00, 0x00, 0x00, // mov rax, fs:0x28
    0x48, 0x89, 0x45, 0xf8, // mov [rbp-8], rax
    0x31, 0xc0, // xor eax, eax
    0x48, 0x8b, 0x55, 0xf8, // mov rdx, [rbp-8]
    0x64, 0x48, 0x2b, 0x14, 0x25, 0x28, 0x00, 0x00, 0x00, // sub rdx, fs:0x28
    0x74, 0x05, // je +5
    0xe8, 0x00, 0x00, 0x00, 0x00, // call __stack_chk_fail
    0xc9, // leave
    0xc3, // ret
];

/// Offset of the guard check inside `PROTECTED_FN`.
pub const PROTECTED_CHECK_OFFSET: u64 = 27;

/// The same function built without a stack protector.
pub const PLAIN_FN: [u8; 20] = [
    0x55, // push rbp
    0x48, 0x89, 0xe5, // mov rbp, rsp
    0x48, 0x83, 0xec, 0x20, // sub rsp, 0x20
    0x48, 0x8d, 0x45, 0xe0, // lea rax, [rbp-0x20]
    0x48, 0x89, 0xc7, // mov rdi, rax
    0x31, 0xc0, // xor eax, eax
    0x90, // nop
    0xc9, // leave
    0xc3, // ret
];

fn put16(d: &mut [u8], at: usize, v: u16) {
    d[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(d: &mut [u8], at: usize, v: u32) {
    d[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put64(d: &mut [u8], at: usize, v: u64) {
    d[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

fn align(d: &mut Vec<u8>, to: usize) {
    while d.len() % to != 0 {
        d.push(0);
    }
}

fn push_str(table: &mut Vec<u8>, s: &str) -> u32 {
    let at = table.len() as u32;
    table.extend_from_slice(s.as_bytes());
    table.push(0);
    at
}

fn sym64(name: u32, info: u8, shndx: u16, value: u64, size: u64) -> [u8; 24] {
    let mut s = [0u8; 24];
    put32(&mut s, 0, name);
    s[4] = info;
    put16(&mut s, 6, shndx);
    put64(&mut s, 8, value);
    put64(&mut s, 16, size);
    s
}

#[allow(clippy::too_many_arguments)]
fn shdr64(name: u32, ty: u32, flags: u64, addr: u64, offset: usize, size: usize, link: u32) -> [u8; 64] {
    let mut s = [0u8; 64];
    put32(&mut s, 0, name);
    put32(&mut s, 4, ty);
    put64(&mut s, 8, flags);
    put64(&mut s, 16, addr);
    put64(&mut s, 24, offset as u64);
    put64(&mut s, 32, size as u64);
    put32(&mut s, 40, link);
    s
}

/// Little-endian x86-64 ELF with `.text`, `.symtab`, `.strtab`, an optional
/// `.dynamic`, and `.shstrtab`. The section header table is written last so
/// every strict prefix of the output is structurally truncated.
#[derive(Debug, Clone, Default)]
pub struct ElfBuilder {
    e_type: u16,
    program_headers: Vec<(u32, u32)>,
    text: Vec<u8>,
    functions: Vec<(String, usize, usize)>,
    imports: Vec<String>,
    needed: Vec<String>,
    runpath: Option<String>,
    dynamic: Vec<(u64, u64)>,
    text_addr: Option<u64>,
}

impl ElfBuilder {
    pub fn executable() -> Self {
        Self {
            e_type: 2,
            ..Default::default()
        }
    }

    pub fn shared() -> Self {
        Self {
            e_type: 3,
            ..Default::default()
        }
    }

    pub fn segment(mut self, p_type: u32, p_flags: u32) -> Self {
        self.program_headers.push((p_type, p_flags));
        self
    }

    /// Append `code` to `.text` and define a function symbol over it.
    pub fn function(mut self, name: &str, code: &[u8]) -> Self {
        let offset = self.text.len();
        self.text.extend_from_slice(code);
        self.functions.push((name.to_string(), offset, code.len()));
        self
    }

    pub fn import(mut self, name: &str) -> Self {
        self.imports.push(name.to_string());
        self
    }

    pub fn needed(mut self, library: &str) -> Self {
        self.needed.push(library.to_string());
        self
    }

    pub fn runpath(mut self, path: &str) -> Self {
        self.runpath = Some(path.to_string());
        self
    }

    pub fn dynamic(mut self, tag: u64, value: u64) -> Self {
        self.dynamic.push((tag, value));
        self
    }

    /// Load `.text` at `addr` instead of `TEXT_ADDR`.
    pub fn text_at(mut self, addr: u64) -> Self {
        self.text_addr = Some(addr);
        self
    }

    fn text_base(&self) -> u64 {
        self.text_addr.unwrap_or(TEXT_ADDR)
    }

    /// Virtual address of the `index`-th function added.
    pub fn function_addr(&self, index: usize) -> u64 {
        self.text_base().wrapping_add(self.functions[index].1 as u64)
    }

    pub fn build(&self) -> Vec<u8> {
        let phnum = self.program_headers.len();
        let mut data = vec![0u8; 0x40 + phnum * 56];
        data[0..4].copy_from_slice(b"\x7fELF");
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // little endian
        data[6] = 1;
        put16(&mut data, 16, self.e_type);
        put16(&mut data, 18, 62); // x86-64
        put32(&mut data, 20, 1);
        let base = self.text_base();
        put64(&mut data, 24, base);
        if phnum > 0 {
            put64(&mut data, 32, 0x40);
        }
        put16(&mut data, 52, 64);
        put16(&mut data, 54, 56);
        put16(&mut data, 56, phnum as u16);
        put16(&mut data, 58, 64);
        for (i, &(p_type, p_flags)) in self.program_headers.iter().enumerate() {
            let at = 0x40 + i * 56;
            put32(&mut data, at, p_type);
            put32(&mut data, at + 4, p_flags);
        }

        align(&mut data, 16);
        let text_off = data.len();
        data.extend_from_slice(&self.text);

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; 24];
        for (name, offset, size) in &self.functions {
            let n = push_str(&mut strtab, name);
            symtab.extend_from_slice(&sym64(
                n,
                0x12,
                1,
                base.wrapping_add(*offset as u64),
                *size as u64,
            ));
        }
        for name in &self.imports {
            let n = push_str(&mut strtab, name);
            symtab.extend_from_slice(&sym64(n, 0x12, 0, 0, 0));
        }
        let mut entries = Vec::new();
        for library in &self.needed {
            entries.push((1u64, push_str(&mut strtab, library) as u64));
        }
        if let Some(path) = &self.runpath {
            entries.push((29, push_str(&mut strtab, path) as u64));
        }
        entries.extend(self.dynamic.iter().copied());

        align(&mut data, 8);
        let symtab_off = data.len();
        data.extend_from_slice(&symtab);
        let strtab_off = data.len();
        data.extend_from_slice(&strtab);
        align(&mut data, 8);
        let dynamic_off = data.len();
        for (tag, value) in &entries {
            data.extend_from_slice(&tag.to_le_bytes());
            data.extend_from_slice(&value.to_le_bytes());
        }
        if !entries.is_empty() {
            data.extend_from_slice(&[0u8; 16]); // DT_NULL
        }
        let dynamic_len = data.len() - dynamic_off;

        let shstrtab = b"\0.text\0.symtab\0.strtab\0.dynamic\0.shstrtab\0";
        let mut headers = vec![[0u8; 64]];
        headers.push(shdr64(1, 1, 0x6, base, text_off, self.text.len(), 0));
        headers.push(shdr64(7, 2, 0, 0, symtab_off, symtab.len(), 3));
        headers.push(shdr64(15, 3, 0, 0, strtab_off, strtab.len(), 0));
        if !entries.is_empty() {
            headers.push(shdr64(23, 6, 0x3, 0, dynamic_off, dynamic_len, 3));
        }
        let shstrtab_off = data.len();
        data.extend_from_slice(shstrtab);
        headers.push(shdr64(32, 3, 0, 0, shstrtab_off, shstrtab.len(), 0));

        align(&mut data, 8);
        let shoff = data.len();
        put64(&mut data, 40, shoff as u64);
        put16(&mut data, 60, headers.len() as u16);
        put16(&mut data, 62, (headers.len() - 1) as u16);
        for header in headers {
            data.extend_from_slice(&header);
        }
        data
    }
}

/// A dynamically linked PIE built with `-fstack-protector-strong`,
/// `-D_FORTIFY_SOURCE=2`, `-Wl,-z,relro,-z,now`.
pub fn hardened_elf() -> ElfBuilder {
    ElfBuilder::shared()
        .segment(PT_LOAD, PF_R | PF_X)
        .segment(PT_DYNAMIC, PF_R | PF_W)
        .segment(PT_GNU_STACK, PF_R | PF_W)
        .segment(PT_GNU_RELRO, PF_R)
        .function("vulnerable", &PROTECTED_FN)
        .function("main", &PLAIN_FN)
        .import("__stack_chk_fail")
        .import("__strcpy_chk")
        .import("__printf_chk")
        .import("puts")
        .needed("libc.so.6")
        .runpath("$ORIGIN/../lib")
        .dynamic(DT_FLAGS, DF_BIND_NOW)
        .dynamic(DT_FLAGS_1, DF_1_PIE)
}

/// The same program built with `-fno-stack-protector -no-pie -z execstack`.
pub fn unhardened_elf() -> ElfBuilder {
    ElfBuilder::executable()
        .segment(PT_LOAD, PF_R | PF_X)
        .segment(PT_GNU_STACK, PF_R | PF_W | PF_X)
        .function("vulnerable", &PLAIN_FN)
        .function("main", &PLAIN_FN)
        .import("strcpy")
        .import("printf")
        .needed("libc.so.6")
}

pub const DYNAMIC_BASE: u16 = 0x0040;
pub const NX_COMPAT: u16 = 0x0100;
pub const NO_SEH: u16 = 0x0400;
pub const NO_ISOLATION: u16 = 0x0200;
pub const FORCE_INTEGRITY: u16 = 0x0080;
pub const GUARD_CF: u16 = 0x4000;
pub const HIGH_ENTROPY_VA: u16 = 0x0020;

/// Fields of the PE load configuration directory written by `PeBuilder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeLoadConfig {
    pub security_cookie: u64,
    pub se_handler_table: u64,
    pub se_handler_count: u64,
    pub guard_flags: u32,
}

/// PE32 or PE32+ image with `.text` and `.rdata`; `.rdata` is the last
/// thing in the file and holds the load configuration when present.
#[derive(Debug, Clone)]
pub struct PeBuilder {
    is_64: bool,
    dll_characteristics: u16,
    load_config: Option<PeLoadConfig>,
    certificate_size: u32,
}

impl PeBuilder {
    pub fn pe32() -> Self {
        Self {
            is_64: false,
            dll_characteristics: 0,
            load_config: None,
            certificate_size: 0,
        }
    }

    pub fn pe32_plus() -> Self {
        Self {
            is_64: true,
            ..Self::pe32()
        }
    }

    pub fn dll_characteristics(mut self, flags: u16) -> Self {
        self.dll_characteristics = flags;
        self
    }

    pub fn load_config(mut self, config: PeLoadConfig) -> Self {
        self.load_config = Some(config);
        self
    }

    pub fn certificate(mut self, size: u32) -> Self {
        self.certificate_size = size;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut d = vec![0u8; 0x400];
        d[0..2].copy_from_slice(b"MZ");
        d[0x3c] = 0x80;
        d[0x80..0x84].copy_from_slice(b"PE\0\0");
        let opt_size: u16 = if self.is_64 { 0xf0 } else { 0xe0 };
        put16(&mut d, 0x84, if self.is_64 { 0x8664 } else { 0x014c });
        put16(&mut d, 0x86, 2);
        put16(&mut d, 0x94, opt_size);
        put16(&mut d, 0x96, 0x0002 | if self.is_64 { 0x0020 } else { 0x0100 });

        let opt = 0x98;
        let dirs = if self.is_64 {
            put16(&mut d, opt, 0x20b);
            put64(&mut d, opt + 24, 0x1_4000_0000);
            put32(&mut d, opt + 108, 16);
            opt + 112
        } else {
            put16(&mut d, opt, 0x10b);
            put32(&mut d, opt + 28, 0x40_0000);
            put32(&mut d, opt + 92, 16);
            opt + 96
        };
        put32(&mut d, opt + 16, 0x1000);
        put16(&mut d, opt + 70, self.dll_characteristics);
        if self.certificate_size > 0 {
            // File offset, not an RVA; the parser only needs the size.
            put32(&mut d, dirs + 4 * 8, 0x400);
            put32(&mut d, dirs + 4 * 8 + 4, self.certificate_size);
        }
        let lc_size: u32 = if self.is_64 { 148 } else { 92 };
        if self.load_config.is_some() {
            put32(&mut d, dirs + 10 * 8, 0x2000);
            put32(&mut d, dirs + 10 * 8 + 4, lc_size);
        }

        let sh = opt + opt_size as usize;
        d[sh..sh + 5].copy_from_slice(b".text");
        put32(&mut d, sh + 8, 0x100);
        put32(&mut d, sh + 12, 0x1000);
        put32(&mut d, sh + 16, 0x100);
        put32(&mut d, sh + 20, 0x200);
        put32(&mut d, sh + 36, 0x6000_0020);
        let sh = sh + 40;
        d[sh..sh + 6].copy_from_slice(b".rdata");
        put32(&mut d, sh + 8, 0x100);
        put32(&mut d, sh + 12, 0x2000);
        put32(&mut d, sh + 16, 0x100);
        put32(&mut d, sh + 20, 0x300);
        put32(&mut d, sh + 36, 0x4000_0040);

        d[0x200] = 0xc3;
        if let Some(lc) = self.load_config {
            let at = 0x300;
            put32(&mut d, at, lc_size);
            if self.is_64 {
                put64(&mut d, at + 88, lc.security_cookie);
                put64(&mut d, at + 96, lc.se_handler_table);
                put64(&mut d, at + 104, lc.se_handler_count);
                put32(&mut d, at + 144, lc.guard_flags);
            } else {
                put32(&mut d, at + 60, lc.security_cookie as u32);
                put32(&mut d, at + 64, lc.se_handler_table as u32);
                put32(&mut d, at + 68, lc.se_handler_count as u32);
                put32(&mut d, at + 88, lc.guard_flags);
            }
        }
        d
    }
}

pub const MH_PIE: u32 = 0x0020_0000;
pub const MH_NO_HEAP_EXECUTION: u32 = 0x0100_0000;

/// 64-bit x86-64 Mach-O executable with `__TEXT,__text`, a symbol table,
/// and optional `__RESTRICT` segment and code signature.
#[derive(Debug, Clone)]
pub struct MachOBuilder {
    flags: u32,
    imports: Vec<String>,
    restrict: bool,
    signature_size: Option<u32>,
    code: Vec<u8>,
    text_base: u64,
}

impl MachOBuilder {
    pub fn executable() -> Self {
        Self {
            flags: 0,
            imports: Vec::new(),
            restrict: false,
            signature_size: None,
            code: PLAIN_FN.to_vec(),
            text_base: 0x1_0000_0000,
        }
    }

    /// Map `__TEXT` at `vmaddr`.
    pub fn text_at(mut self, vmaddr: u64) -> Self {
        self.text_base = vmaddr;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn import(mut self, name: &str) -> Self {
        self.imports.push(name.to_string());
        self
    }

    pub fn restrict(mut self) -> Self {
        self.restrict = true;
        self
    }

    pub fn signature(mut self, size: u32) -> Self {
        self.signature_size = Some(size);
        self
    }

    pub fn code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        const LC_SEGMENT_64: u32 = 0x19;
        const LC_SYMTAB: u32 = 0x2;
        const LC_CODE_SIGNATURE: u32 = 0x1d;
        const CODE_OFF: usize = 0x400;

        let mut d = vec![0u8; CODE_OFF];
        put32(&mut d, 0, 0xfeed_facf);
        put32(&mut d, 4, 0x0100_0007);
        put32(&mut d, 12, 2); // MH_EXECUTE
        put32(&mut d, 24, self.flags);

        let mut ncmds = 0u32;
        let mut at = 32;

        // __TEXT with one __text section; the code follows the command area.
        put32(&mut d, at, LC_SEGMENT_64);
        put32(&mut d, at + 4, 72 + 80);
        d[at + 8..at + 14].copy_from_slice(b"__TEXT");
        put64(&mut d, at + 24, self.text_base);
        put64(&mut d, at + 32, 0x1000);
        put32(&mut d, at + 60, 5); // r-x
        put32(&mut d, at + 64, 1);
        let s = at + 72;
        d[s..s + 6].copy_from_slice(b"__text");
        d[s + 16..s + 22].copy_from_slice(b"__TEXT");
        put64(&mut d, s + 32, self.text_base.wrapping_add(CODE_OFF as u64));
        put64(&mut d, s + 40, self.code.len() as u64);
        put32(&mut d, s + 48, CODE_OFF as u32);
        put32(&mut d, s + 64, 0x8000_0400);
        at += 152;
        ncmds += 1;

        if self.restrict {
            put32(&mut d, at, LC_SEGMENT_64);
            put32(&mut d, at + 4, 72);
            d[at + 8..at + 18].copy_from_slice(b"__RESTRICT");
            at += 72;
            ncmds += 1;
        }

        let symtab_cmd = at;
        put32(&mut d, at, LC_SYMTAB);
        put32(&mut d, at + 4, 24);
        at += 24;
        ncmds += 1;

        let signature_cmd = self.signature_size.map(|_| {
            let cmd = at;
            put32(&mut d, cmd, LC_CODE_SIGNATURE);
            put32(&mut d, cmd + 4, 16);
            cmd
        });
        if signature_cmd.is_some() {
            at += 16;
            ncmds += 1;
        }

        put32(&mut d, 16, ncmds);
        put32(&mut d, 20, (at - 32) as u32);

        d.extend_from_slice(&self.code);
        align(&mut d, 8);

        let mut strtab = vec![0u8];
        let mut symbols = Vec::new();
        let main = push_str(&mut strtab, "_main");
        symbols.push((main, 0x0fu8, 1u8, self.text_base.wrapping_add(CODE_OFF as u64)));
        for name in &self.imports {
            let n = push_str(&mut strtab, name);
            symbols.push((n, 0x01, 0, 0));
        }
        let symoff = d.len();
        for (strx, n_type, n_sect, value) in &symbols {
            let mut entry = [0u8; 16];
            put32(&mut entry, 0, *strx);
            entry[4] = *n_type;
            entry[5] = *n_sect;
            put64(&mut entry, 8, *value);
            d.extend_from_slice(&entry);
        }
        let stroff = d.len();
        d.extend_from_slice(&strtab);
        put32(&mut d, symtab_cmd + 8, symoff as u32);
        put32(&mut d, symtab_cmd + 12, symbols.len() as u32);
        put32(&mut d, symtab_cmd + 16, stroff as u32);
        put32(&mut d, symtab_cmd + 20, strtab.len() as u32);

        if let (Some(cmd), Some(size)) = (signature_cmd, self.signature_size) {
            align(&mut d, 16);
            let dataoff = d.len();
            d.extend(std::iter::repeat(0xfa).take(size as usize));
            put32(&mut d, cmd + 8, dataoff as u32);
            put32(&mut d, cmd + 12, size);
        }
        d
    }
}
