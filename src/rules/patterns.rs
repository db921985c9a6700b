//! Precompiled byte patterns for stack-guard checks and stack-clash loops.
//!
//! A compiler-inserted canary check compares the saved guard against the
//! value in thread-local storage right before the function returns:
//! `fs:0x28` on x86-64 glibc, `gs:0x14` on i386. Only the check forms are
//! matched (sub/xor/cmp); the prologue load alone proves nothing.
//!
//! Stack-clash protection grows large frames one 4 KiB page at a time and
//! touches each page. GCC emits `sub sp, 0x1000` then an `or [sp+off], 0`;
//! Clang emits the `xor [sp], 0` touch first.

use crate::image::Arch;
use aho_corasick::{AhoCorasick, MatchKind};
use once_cell::sync::Lazy;

const REGS_64: [&str; 8] = ["rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi"];
const REGS_64_EXT: [&str; 8] = ["r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"];
const REGS_32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
const CHECK_OPS: [(u8, &str); 3] = [(0x2b, "sub"), (0x33, "xor"), (0x3b, "cmp")];

/// A named set of byte sequences searched in one pass.
pub struct PatternSet {
    automaton: AhoCorasick,
    names: Vec<String>,
}

/// One pattern occurrence inside a haystack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch<'p> {
    pub start: usize,
    pub end: usize,
    pub name: &'p str,
}

impl PatternSet {
    fn build(patterns: Vec<(String, Vec<u8>)>) -> Option<Self> {
        let (names, bytes): (Vec<_>, Vec<_>) = patterns.into_iter().unzip();
        match AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&bytes)
        {
            Ok(automaton) => Some(Self { automaton, names }),
            Err(e) => {
                tracing::error!(error = %e, "failed to build pattern automaton");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn find_iter<'a>(&'a self, haystack: &'a [u8]) -> impl Iterator<Item = PatternMatch<'a>> + 'a {
        self.automaton.find_iter(haystack).map(move |m| PatternMatch {
            start: m.start(),
            end: m.end(),
            name: self.names[m.pattern().as_usize()].as_str(),
        })
    }
}

fn x86_64_guard_checks() -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    for (opcode, mnemonic) in CHECK_OPS {
        for (rex, regs) in [(0x48u8, REGS_64), (0x4c, REGS_64_EXT)] {
            for (i, reg) in regs.iter().enumerate() {
                let modrm = ((i as u8) << 3) | 0x04; // [disp32] via SIB
                out.push((
                    format!("{} {}, fs:[0x28]", mnemonic, reg),
                    vec![0x64, rex, opcode, modrm, 0x25, 0x28, 0x00, 0x00, 0x00],
                ));
            }
        }
    }
    out
}

fn x86_guard_checks() -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    for (opcode, mnemonic) in CHECK_OPS {
        for (i, reg) in REGS_32.iter().enumerate() {
            let modrm = ((i as u8) << 3) | 0x05; // disp32
            out.push((
                format!("{} {}, gs:[0x14]", mnemonic, reg),
                vec![0x65, opcode, modrm, 0x14, 0x00, 0x00, 0x00],
            ));
        }
    }
    out
}

fn x86_64_page_touches() -> Vec<(String, Vec<u8>)> {
    // sub rsp, 0x1000
    let sub: &[u8] = &[0x48, 0x81, 0xec, 0x00, 0x10, 0x00, 0x00];
    vec![
        (
            "sub rsp, 0x1000; or qword [rsp+0xff8], 0".to_string(),
            [sub, &[0x48, 0x83, 0x8c, 0x24, 0xf8, 0x0f, 0x00, 0x00, 0x00]].concat(),
        ),
        (
            "sub rsp, 0x1000; or qword [rsp], 0".to_string(),
            [sub, &[0x48, 0x83, 0x0c, 0x24, 0x00]].concat(),
        ),
        (
            "xor qword [rsp], 0; sub rsp, 0x1000".to_string(),
            [&[0x48, 0x83, 0x34, 0x24, 0x00][..], sub].concat(),
        ),
    ]
}

fn x86_page_touches() -> Vec<(String, Vec<u8>)> {
    // sub esp, 0x1000
    let sub: &[u8] = &[0x81, 0xec, 0x00, 0x10, 0x00, 0x00];
    vec![
        (
            "sub esp, 0x1000; or dword [esp+0xffc], 0".to_string(),
            [sub, &[0x83, 0x8c, 0x24, 0xfc, 0x0f, 0x00, 0x00, 0x00]].concat(),
        ),
        (
            "sub esp, 0x1000; or dword [esp], 0".to_string(),
            [sub, &[0x83, 0x0c, 0x24, 0x00]].concat(),
        ),
        (
            "xor dword [esp], 0; sub esp, 0x1000".to_string(),
            [&[0x83, 0x34, 0x24, 0x00][..], sub].concat(),
        ),
    ]
}

static X86_64_GUARD_CHECKS: Lazy<Option<PatternSet>> =
    Lazy::new(|| PatternSet::build(x86_64_guard_checks()));
static X86_GUARD_CHECKS: Lazy<Option<PatternSet>> =
    Lazy::new(|| PatternSet::build(x86_guard_checks()));

/// Guard-check patterns for an architecture, if any are known.
pub fn guard_checks(arch: Arch) -> Option<&'static PatternSet> {
    match arch {
        Arch::X86_64 => X86_64_GUARD_CHECKS.as_ref(),
        Arch::X86 => X86_GUARD_CHECKS.as_ref(),
        _ => None,
    }
}

static X86_64_PAGE_TOUCHES: Lazy<Option<PatternSet>> =
    Lazy::new(|| PatternSet::build(x86_64_page_touches()));
static X86_PAGE_TOUCHES: Lazy<Option<PatternSet>> =
    Lazy::new(|| PatternSet::build(x86_page_touches()));

/// Page-at-a-time stack growth loops for an architecture, if any are known.
pub fn page_touches(arch: Arch) -> Option<&'static PatternSet> {
    match arch {
        Arch::X86_64 => X86_64_PAGE_TOUCHES.as_ref(),
        Arch::X86 => X86_PAGE_TOUCHES.as_ref(),
        _ => None,
    }
}
