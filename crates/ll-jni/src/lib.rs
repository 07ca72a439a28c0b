mod global;
mod jni_api;
mod logging;
mod types;

pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use ll_engine::{Backend, Bridge, HandleId, LoadParams, NULL_HANDLE};

use global::bridge;

/// Run `f`, returning `fallback` if it panics.
///
/// Shared state behind the bridge is lock-protected and recovers from
/// poisoning, so it is safe to keep using after a caught panic.
fn catch_panic<T, F: FnOnce() -> T>(fallback: T, f: F) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("internal panic caught at the native boundary");
            fallback
        }
    }
}

/// Borrow a C string as UTF-8; null and invalid strings yield `None`.
unsafe fn read_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

/// Hand `text` to C. Text after an interior NUL cannot be represented and
/// is dropped.
fn into_c_string(text: String) -> *mut c_char {
    let bytes: Vec<u8> = text.into_bytes().into_iter().take_while(|&b| b != 0).collect();
    match CString::new(bytes) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn load_from<B: Backend>(bridge: &Bridge<B>, path: *const c_char, params: &LoadParams) -> HandleId {
    match read_str(path) {
        Some(path) => bridge.load_with(path, params),
        None => {
            log::warn!("load: path is null or not UTF-8");
            NULL_HANDLE
        }
    }
}

unsafe fn infer_from<B: Backend>(
    bridge: &Bridge<B>,
    handle: HandleId,
    prompt: *const c_char,
    max_tokens: i32,
) -> *mut c_char {
    let Some(prompt) = read_str(prompt) else {
        log::warn!("infer: prompt is null or not UTF-8");
        return ptr::null_mut();
    };
    match bridge.infer(handle, prompt, i64::from(max_tokens)) {
        Some(text) => into_c_string(text),
        None => ptr::null_mut(),
    }
}

/// Default load parameters (2048-token context, 4 threads).
#[no_mangle]
pub extern "C" fn llb_load_params_default() -> LlbLoadParams {
    LlbLoadParams::default()
}

/// Load a GGUF model with default parameters.
///
/// Returns a non-zero handle on success and 0 on any failure. Release the
/// handle with `llb_unload`.
#[no_mangle]
pub unsafe extern "C" fn llb_load(path: *const c_char) -> u64 {
    catch_panic(NULL_HANDLE, || {
        let bridge = bridge();
        let params = LoadParams::default();
        unsafe { load_from(bridge, path, &params) }
    })
}

/// Load a GGUF model with explicit parameters. Returns 0 on failure.
#[no_mangle]
pub unsafe extern "C" fn llb_load_with_params(path: *const c_char, params: LlbLoadParams) -> u64 {
    catch_panic(NULL_HANDLE, || {
        let params = LoadParams::from(params);
        unsafe { load_from(bridge(), path, &params) }
    })
}

/// Greedily complete `prompt` with at most `max_tokens` tokens.
///
/// Returns a heap-allocated C string the caller must free with
/// `llb_free_string`, or null on failure.
#[no_mangle]
pub unsafe extern "C" fn llb_infer(handle: u64, prompt: *const c_char, max_tokens: i32) -> *mut c_char {
    catch_panic(ptr::null_mut(), || unsafe {
        infer_from(bridge(), handle, prompt, max_tokens)
    })
}

/// Release a handle. Unknown and zero handles are ignored.
#[no_mangle]
pub extern "C" fn llb_unload(handle: u64) {
    catch_panic((), || bridge().unload(handle))
}

/// 1 when llama.cpp is linked, 0 for the fallback build.
#[no_mangle]
pub extern "C" fn llb_is_real_backend() -> i32 {
    catch_panic(0, || i32::from(bridge().is_real_backend()))
}

/// Free a string previously returned by `llb_infer`.
#[no_mangle]
pub unsafe extern "C" fn llb_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ll_engine::mock::{MockBackend, MockScript};
    use std::io::Write;

    fn model_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"GGUF").unwrap();
        file.write_all(&3u32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 16]).unwrap();
        file
    }

    fn c_path(file: &tempfile::NamedTempFile) -> CString {
        CString::new(file.path().to_str().unwrap()).unwrap()
    }

    unsafe fn take(s: *mut c_char) -> Option<String> {
        if s.is_null() {
            return None;
        }
        let text = CStr::from_ptr(s).to_str().unwrap().to_string();
        llb_free_string(s);
        Some(text)
    }

    #[test]
    fn test_scenario_sentinels() {
        let empty = CString::new("").unwrap();
        let missing = CString::new("/nonexistent/path").unwrap();
        let hello = CString::new("hello").unwrap();
        unsafe {
            assert_eq!(llb_load(ptr::null()), 0);
            assert_eq!(llb_load(empty.as_ptr()), 0);
            assert_eq!(llb_load(missing.as_ptr()), 0);
            assert!(llb_infer(0, hello.as_ptr(), 10).is_null());
            assert!(llb_infer(0, ptr::null(), 10).is_null());
            llb_free_string(ptr::null_mut());
        }
        llb_unload(0);
        llb_unload(u64::MAX);
    }

    #[cfg(not(feature = "llama"))]
    #[test]
    fn test_fallback_build() {
        let file = model_file();
        let path = c_path(&file);
        assert_eq!(llb_is_real_backend(), 0);
        unsafe {
            assert_eq!(llb_load(path.as_ptr()), 0);
            assert_eq!(llb_load_with_params(path.as_ptr(), llb_load_params_default()), 0);
        }
    }

    #[test]
    fn test_infer_through_c_strings() {
        let file = model_file();
        let path = c_path(&file);
        let prompt = CString::new("hello").unwrap();
        let bridge = Bridge::new(MockBackend::new());

        unsafe {
            let handle = load_from(&bridge, path.as_ptr(), &LoadParams::default());
            assert_ne!(handle, NULL_HANDLE);
            let text = take(infer_from(&bridge, handle, prompt.as_ptr(), 10));
            assert_eq!(text.as_deref(), Some(" world!"));

            let empty = CString::new("").unwrap();
            assert!(infer_from(&bridge, handle, empty.as_ptr(), 10).is_null());

            bridge.unload(handle);
            assert!(infer_from(&bridge, handle, prompt.as_ptr(), 10).is_null());
        }
    }

    #[test]
    fn test_non_utf8_prompt_is_rejected() {
        let file = model_file();
        let path = c_path(&file);
        let bad = CString::new(vec![0xFFu8, 0xFE]).unwrap();
        let bridge = Bridge::new(MockBackend::new());

        unsafe {
            let handle = load_from(&bridge, path.as_ptr(), &LoadParams::default());
            assert!(infer_from(&bridge, handle, bad.as_ptr(), 10).is_null());
            assert_eq!(load_from(&bridge, bad.as_ptr(), &LoadParams::default()), NULL_HANDLE);
        }
    }

    #[test]
    fn test_load_with_custom_params() {
        let file = model_file();
        let path = c_path(&file);
        let prompt = CString::new("hello").unwrap();
        let script = MockScript::default().replies(vec![3; 64]);
        let bridge = Bridge::new(MockBackend::new().with_script(script));
        let params = LlbLoadParams {
            n_ctx: 5,
            ..LlbLoadParams::default()
        };

        unsafe {
            let handle = load_from(&bridge, path.as_ptr(), &LoadParams::from(params));
            // Prompt takes two positions, leaving three for output.
            let text = take(infer_from(&bridge, handle, prompt.as_ptr(), 100));
            assert_eq!(text.as_deref(), Some("hellohellohello"));
        }
    }

    #[test]
    fn test_interior_nul_is_truncated() {
        let text = unsafe { take(into_c_string("abc\0def".to_string())) };
        assert_eq!(text.as_deref(), Some("abc"));
    }

    #[test]
    fn test_catch_panic_returns_fallback() {
        let value = catch_panic(7, || -> i32 { panic!("boom") });
        assert_eq!(value, 7);
    }
}
