//! Program-interface entry points glow does not wrap.
//!
//! Listing the active shader storage blocks of a program needs
//! `glGetProgramInterfaceiv` and `glGetProgramResourceName`. Both are resolved
//! from the same loader as the rest of the GL table and may be missing.

use std::ffi::{c_char, c_void};

type GetProgramInterfaceiv = unsafe extern "system" fn(u32, u32, u32, *mut i32);
type GetProgramResourceName = unsafe extern "system" fn(u32, u32, u32, i32, *mut i32, *mut c_char);

pub(crate) const GET_PROGRAM_INTERFACE: &str = "glGetProgramInterfaceiv";
pub(crate) const GET_PROGRAM_RESOURCE_NAME: &str = "glGetProgramResourceName";

/// Optional program-interface queries of the current context.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceQueries {
    active_resources: Option<GetProgramInterfaceiv>,
    resource_name: Option<GetProgramResourceName>,
}

impl InterfaceQueries {
    /// Resolves both entry points through `loader`. Null results stay unavailable.
    ///
    /// # Safety
    ///
    /// `loader` must return null or the address of the named GL entry point.
    pub unsafe fn load<F>(mut loader: F) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        let active = loader(GET_PROGRAM_INTERFACE);
        let name = loader(GET_PROGRAM_RESOURCE_NAME);
        Self {
            active_resources: (!active.is_null())
                .then(|| std::mem::transmute::<*const c_void, GetProgramInterfaceiv>(active)),
            resource_name: (!name.is_null())
                .then(|| std::mem::transmute::<*const c_void, GetProgramResourceName>(name)),
        }
    }

    /// Whether both entry points resolved.
    pub fn is_available(&self) -> bool {
        self.active_resources.is_some() && self.resource_name.is_some()
    }

    /// `GL_ACTIVE_RESOURCES` of `interface` in `program`.
    ///
    /// # Safety
    ///
    /// `program` must be a linked program of the current context.
    pub(crate) unsafe fn active_resources(&self, program: glow::Program, interface: u32) -> Option<u32> {
        let query = self.active_resources?;
        let mut count = 0i32;
        query(program.0.get(), interface, glow::ACTIVE_RESOURCES, &mut count);
        u32::try_from(count).ok()
    }

    /// Name of resource `index`; `name_len` is `GL_NAME_LENGTH`, terminator included.
    ///
    /// # Safety
    ///
    /// `program` must be a linked program of the current context.
    pub(crate) unsafe fn resource_name(
        &self,
        program: glow::Program,
        interface: u32,
        index: u32,
        name_len: usize,
    ) -> Option<String> {
        let query = self.resource_name?;
        let mut buf = vec![0u8; name_len.max(1)];
        let mut written = 0i32;
        query(
            program.0.get(),
            interface,
            index,
            i32::try_from(buf.len()).ok()?,
            &mut written,
            buf.as_mut_ptr().cast::<c_char>(),
        );
        buf.truncate(usize::try_from(written).unwrap_or(0).min(buf.len()));
        String::from_utf8(buf).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    const BLOCK_NAMES: [&str; 2] = ["kernel_ssbo", "histogram"];

    unsafe extern "system" fn fake_interface(_program: u32, _interface: u32, pname: u32, out: *mut i32) {
        if pname == glow::ACTIVE_RESOURCES {
            *out = BLOCK_NAMES.len() as i32;
        }
    }

    unsafe extern "system" fn fake_name(
        _program: u32,
        _interface: u32,
        index: u32,
        size: i32,
        written: *mut i32,
        name: *mut c_char,
    ) {
        let src = BLOCK_NAMES[index as usize].as_bytes();
        let n = src.len().min(size as usize - 1);
        std::ptr::copy_nonoverlapping(src.as_ptr(), name.cast::<u8>(), n);
        *name.add(n) = 0;
        *written = n as i32;
    }

    fn program() -> glow::Program {
        glow::NativeProgram(NonZeroU32::new(7).unwrap())
    }

    fn fake_loader(symbol: &str) -> *const c_void {
        match symbol {
            GET_PROGRAM_INTERFACE => fake_interface as *const c_void,
            GET_PROGRAM_RESOURCE_NAME => fake_name as *const c_void,
            _ => std::ptr::null(),
        }
    }

    #[test]
    fn test_missing_entry_points() {
        let queries = unsafe { InterfaceQueries::load(|_| std::ptr::null()) };
        assert!(!queries.is_available());
        assert_eq!(
            unsafe { queries.active_resources(program(), glow::SHADER_STORAGE_BLOCK) },
            None
        );
        assert!(!InterfaceQueries::default().is_available());
    }

    #[test]
    fn test_lists_names_through_loaded_entry_points() {
        let queries = unsafe { InterfaceQueries::load(fake_loader) };
        assert!(queries.is_available());
        unsafe {
            assert_eq!(
                queries.active_resources(program(), glow::SHADER_STORAGE_BLOCK),
                Some(2)
            );
            assert_eq!(
                queries
                    .resource_name(program(), glow::SHADER_STORAGE_BLOCK, 0, 12)
                    .as_deref(),
                Some("kernel_ssbo")
            );
            // a short buffer truncates instead of overrunning
            assert_eq!(
                queries
                    .resource_name(program(), glow::SHADER_STORAGE_BLOCK, 1, 5)
                    .as_deref(),
                Some("hist")
            );
        }
    }
}
