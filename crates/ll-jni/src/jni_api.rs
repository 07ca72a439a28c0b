//! Entry points for `com.persianai.assistant.offline.LocalLlamaRunner`.
//!
//! Kotlin side:
//! ```kotlin
//! private external fun nativeLoad(path: String): Long
//! private external fun nativeInfer(handle: Long, prompt: String, maxTokens: Int): String?
//! private external fun nativeUnload(handle: Long)
//! private external fun nativeIsRealBackend(): Int
//! ```

use std::ffi::c_void;
use std::ptr;

use jni::objects::{JObject, JString};
use jni::sys::{jint, jlong, jstring, JNI_VERSION_1_6};
use jni::JNIEnv;

use ll_engine::HandleId;

use crate::global::bridge;
use crate::{catch_panic, logging};

/// Read a Java string; null or unreadable strings become empty.
fn read_string(env: &mut JNIEnv, value: &JString) -> String {
    if value.is_null() {
        return String::new();
    }
    match env.get_string(value) {
        Ok(s) => s.into(),
        Err(e) => {
            log::warn!("failed to read Java string: {}", e);
            String::new()
        }
    }
}

#[no_mangle]
pub extern "system" fn JNI_OnLoad(_vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
    logging::init();
    JNI_VERSION_1_6
}

/// Returns a handle, or 0 on failure.
#[no_mangle]
pub extern "system" fn Java_com_persianai_assistant_offline_LocalLlamaRunner_nativeLoad(
    mut env: JNIEnv,
    _this: JObject,
    path: JString,
) -> jlong {
    catch_panic(0, || {
        let path = read_string(&mut env, &path);
        bridge().load(&path) as jlong
    })
}

/// Returns the generated text, or null.
#[no_mangle]
pub extern "system" fn Java_com_persianai_assistant_offline_LocalLlamaRunner_nativeInfer(
    mut env: JNIEnv,
    _this: JObject,
    handle: jlong,
    prompt: JString,
    max_tokens: jint,
) -> jstring {
    catch_panic(ptr::null_mut(), || {
        let prompt = read_string(&mut env, &prompt);
        let Some(text) = bridge().infer(handle as HandleId, &prompt, i64::from(max_tokens)) else {
            return ptr::null_mut();
        };
        match env.new_string(text) {
            Ok(s) => s.into_raw(),
            Err(e) => {
                log::warn!("failed to create Java string: {}", e);
                ptr::null_mut()
            }
        }
    })
}

#[no_mangle]
pub extern "system" fn Java_com_persianai_assistant_offline_LocalLlamaRunner_nativeUnload(
    _env: JNIEnv,
    _this: JObject,
    handle: jlong,
) {
    catch_panic((), || bridge().unload(handle as HandleId))
}

/// 1 when llama.cpp is linked, 0 for the fallback build.
#[no_mangle]
pub extern "system" fn Java_com_persianai_assistant_offline_LocalLlamaRunner_nativeIsRealBackend(
    _env: JNIEnv,
    _this: JObject,
) -> jint {
    catch_panic(0, || jint::from(bridge().is_real_backend()))
}
