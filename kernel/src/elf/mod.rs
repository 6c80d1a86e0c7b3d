//! ELF64 static loader and SysV user-stack builder (spec.md §4.6).
//!
//! Adapted from the teacher's multi-architecture, dynamic-linking-capable
//! loader: this kernel only ever loads a statically linked, x86_64
//! ET_EXEC/ET_DYN image with no interpreter, relocations, or symbol
//! table, so the probe/load/aux-vector pipeline is kept but the
//! dynamic-linking machinery is dropped.

extern crate alloc;

use alloc::vec::Vec;
use core::mem::size_of;

pub mod types;

use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::AddressSpace;
use crate::mm::{phys_to_virt, PageFlags, VirtAddr};
use crate::process::fd::{FileObject, SeekFrom};
use types::{
    Elf64Header, Elf64ProgramHeader, ElfError, ElfImage, EHDR_SIZE, ELF_CLASS_64, ELF_DATA_LSB, ELF_MAGIC,
    EM_X86_64, ET_DYN, ET_EXEC, PF_W, PF_X, PHDR_SIZE, PT_LOAD,
};

fn read_at(file: &dyn FileObject, offset: u64, buf: &mut [u8]) -> KernelResult<()> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(KernelError::NoRead);
        }
        filled += n;
    }
    Ok(())
}

fn read_header(file: &dyn FileObject) -> KernelResult<Elf64Header> {
    let mut raw = [0u8; EHDR_SIZE];
    read_at(file, 0, &mut raw)?;
    // SAFETY: `Elf64Header` is `#[repr(C)]`, plain old data, and `raw` is
    // exactly its size.
    Ok(unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const Elf64Header) })
}

/// Check the 64-byte header against spec.md §4.6's probe criteria.
pub fn probe(file: &dyn FileObject) -> Result<(), ElfError> {
    let header = read_header(file).map_err(|_| ElfError::Truncated)?;
    if header.magic != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if header.class != ELF_CLASS_64 {
        return Err(ElfError::BadClass);
    }
    if header.data != ELF_DATA_LSB {
        return Err(ElfError::BadData);
    }
    if header.machine != EM_X86_64 {
        return Err(ElfError::BadMachine);
    }
    if header.elf_type != ET_EXEC && header.elf_type != ET_DYN {
        return Err(ElfError::BadType);
    }
    Ok(())
}

/// Load every `PT_LOAD` segment into `space` (spec.md §4.6 Load
/// algorithm). On any failure, unmaps everything mapped so far so the
/// caller's address space is left unchanged (spec.md §4.7's recovery
/// policy).
pub fn load(file: &dyn FileObject, space: &AddressSpace) -> Result<ElfImage, ElfError> {
    probe(file)?;
    let header = read_header(file).map_err(|_| ElfError::Truncated)?;

    if header.phnum == 0 {
        return Err(ElfError::BadProgramHeader);
    }

    let mut phdrs = Vec::with_capacity(header.phnum as usize);
    for i in 0..header.phnum as u64 {
        let mut raw = [0u8; PHDR_SIZE];
        read_at(file, header.phoff + i * header.phentsize as u64, &mut raw).map_err(|_| ElfError::Truncated)?;
        // SAFETY: `Elf64ProgramHeader` is `#[repr(C)]` POD, `raw` is sized exactly.
        let phdr = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const Elf64ProgramHeader) };
        phdrs.push(phdr);
    }

    let mut mapped: Vec<(VirtAddr, usize)> = Vec::new();
    let mut load_base: Option<u64> = None;
    let mut phdr_addr = 0u64;

    for phdr in &phdrs {
        if phdr.p_type != PT_LOAD {
            continue;
        }
        if let Err(e) = load_segment(file, space, phdr, &mut mapped) {
            for (va, len) in mapped.iter().rev() {
                unmap_range(space, *va, *len);
            }
            return Err(e);
        }
        if load_base.is_none() {
            let va_start = phdr.p_vaddr & !0xFFF;
            load_base = Some(va_start);
        }
        // The segment whose on-disk range covers `e_phoff` is where the
        // program header table itself lands once mapped.
        if phdr.p_offset <= header.phoff && header.phoff < phdr.p_offset + phdr.p_filesz {
            phdr_addr = phdr.p_vaddr + (header.phoff - phdr.p_offset);
        }
    }

    let load_base = load_base.ok_or(ElfError::BadProgramHeader)?;
    Ok(ElfImage {
        entry: header.entry,
        load_base,
        phdr_addr,
        phnum: header.phnum,
    })
}

fn load_segment(
    file: &dyn FileObject,
    space: &AddressSpace,
    phdr: &Elf64ProgramHeader,
    mapped: &mut Vec<(VirtAddr, usize)>,
) -> Result<(), ElfError> {
    let va_start = phdr.p_vaddr & !0xFFF;
    let va_end = (phdr.p_vaddr + phdr.p_memsz + 0xFFF) & !0xFFF;
    let map_len = (va_end - va_start) as usize;

    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if phdr.p_flags & PF_W != 0 {
        flags |= PageFlags::WRITABLE;
    }
    if phdr.p_flags & PF_X == 0 {
        flags |= PageFlags::NOEXECUTE;
    }

    space
        .map_range_zeroed(VirtAddr::new(va_start), map_len, flags)
        .map_err(|_| ElfError::BadProgramHeader)?;
    mapped.push((VirtAddr::new(va_start), map_len));

    let mut remaining = phdr.p_filesz;
    let mut file_off = phdr.p_offset;
    let mut va = phdr.p_vaddr;
    let mut chunk = [0u8; 512];
    while remaining > 0 {
        let take = remaining.min(chunk.len() as u64) as usize;
        read_at(file, file_off, &mut chunk[..take]).map_err(|_| ElfError::Truncated)?;
        write_user_bytes(space, va, &chunk[..take]).map_err(|_| ElfError::BadProgramHeader)?;
        remaining -= take as u64;
        file_off += take as u64;
        va += take as u64;
    }

    Ok(())
}

/// Write `bytes` into the mapped user region starting at `va`, one page
/// at a time, translating each page to its backing frame via the HHDM
/// alias (spec.md §4.6: "stream bytes ... writing through the HHDM
/// alias").
fn write_user_bytes(space: &AddressSpace, va: u64, bytes: &[u8]) -> KernelResult<()> {
    let mut written = 0;
    while written < bytes.len() {
        let cur_va = VirtAddr::new(va + written as u64);
        let page_base = cur_va.align_down();
        let offset_in_page = (cur_va.as_u64() - page_base.as_u64()) as usize;
        let phys = space.translate(page_base).ok_or(KernelError::NoSuch)?;
        let dst = phys_to_virt(phys).as_mut_ptr::<u8>();
        let space_left_in_page = 4096 - offset_in_page;
        let take = (bytes.len() - written).min(space_left_in_page);
        // SAFETY: `dst` points into the HHDM alias of a frame this
        // address space owns and has just mapped writable.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr().add(written), dst.add(offset_in_page), take);
        }
        written += take;
    }
    Ok(())
}

fn unmap_range(space: &AddressSpace, va: VirtAddr, len: usize) {
    let mut cur = va.as_u64();
    let end = cur + len as u64;
    while cur < end {
        let _ = space.unmap_page(VirtAddr::new(cur));
        cur += 4096;
    }
}

const AT_NULL: u64 = 0;
const AT_PHDR: u64 = 3;
const AT_PHENT: u64 = 4;
const AT_PHNUM: u64 = 5;
const AT_PAGESZ: u64 = 6;
const AT_BASE: u64 = 7;
const AT_ENTRY: u64 = 9;
const AT_EXECFN: u64 = 31;

/// Build the auxiliary vector (spec.md §4.6), `(type, value)` pairs
/// terminated by `AT_NULL`. `execfn_ptr` is the user-side pointer to
/// `argv[0]`'s copied string (0 if `argv` is empty).
pub fn build_aux(image: &ElfImage, execfn_ptr: u64, out: &mut [(u64, u64)]) -> usize {
    let entries: [(u64, u64); 8] = [
        (AT_PHDR, image.phdr_addr),
        (AT_PHENT, size_of::<Elf64ProgramHeader>() as u64),
        (AT_PHNUM, image.phnum as u64),
        (AT_PAGESZ, 4096),
        (AT_BASE, image.load_base),
        (AT_ENTRY, image.entry),
        (AT_EXECFN, execfn_ptr),
        (AT_NULL, 0),
    ];
    let n = entries.len().min(out.len());
    out[..n].copy_from_slice(&entries[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelResult;
    use core::cell::RefCell;

    struct MemFile {
        data: Vec<u8>,
        pos: RefCell<u64>,
    }

    impl FileObject for MemFile {
        fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
            let mut pos = self.pos.borrow_mut();
            let start = *pos as usize;
            if start >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            *pos += n as u64;
            Ok(n)
        }
        fn write(&self, _buf: &[u8]) -> KernelResult<usize> {
            Err(KernelError::NoWrite)
        }
        fn seek(&self, pos: SeekFrom) -> KernelResult<u64> {
            let new_pos = match pos {
                SeekFrom::Start(p) => p,
                _ => return Err(KernelError::BadArgs),
            };
            *self.pos.borrow_mut() = new_pos;
            Ok(new_pos)
        }
        fn stat(&self) -> KernelResult<crate::process::fd::FileStat> {
            Ok(crate::process::fd::FileStat {
                size: self.data.len() as u64,
                is_dir: false,
            })
        }
    }

    fn bad_magic_file() -> MemFile {
        MemFile {
            data: alloc::vec![0u8; EHDR_SIZE],
            pos: RefCell::new(0),
        }
    }

    #[test]
    fn probe_rejects_bad_magic() {
        let file = bad_magic_file();
        assert_eq!(probe(&file), Err(ElfError::BadMagic));
    }

    #[test]
    fn probe_rejects_truncated_header() {
        let file = MemFile {
            data: alloc::vec![0u8; 4],
            pos: RefCell::new(0),
        };
        assert!(probe(&file).is_err());
    }

    #[test]
    fn build_aux_terminates_with_at_null() {
        let image = ElfImage {
            entry: 0x4000_0000,
            load_base: 0x4000_0000,
            phdr_addr: 0x4000_0040,
            phnum: 3,
        };
        let mut out = [(0u64, 0u64); 8];
        let n = build_aux(&image, 0, &mut out);
        assert_eq!(n, 8);
        assert_eq!(out[n - 1], (AT_NULL, 0));
        assert_eq!(out[5], (AT_ENTRY, 0x4000_0000));
        assert_eq!(out[0], (AT_PHDR, 0x4000_0040));
        assert_eq!(out[2], (AT_PHNUM, 3));
    }
}
