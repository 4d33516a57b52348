//! Native dynamic library spiders
//!
//! A spider module is a shared library (.dll on Windows, .so on Linux, .dylib
//! on macOS) exporting a small C ABI:
//!
//! ```text
//! int  spider_new(const char *type_name, void **instance);
//! int  spider_invoke(void *instance, const char *method, const char *params_json, char **result);
//! void spider_free(char *result);            // optional
//! void spider_drop(void *instance);          // optional
//! int  spider_module_init(void);             // optional
//! ```
//!
//! Status codes: 0 is success, 1 means "no such type / no such method", any
//! other value is a failure. Results are NUL-terminated UTF-8 JSON; a null
//! result pointer means the method returned nothing.

use crate::core::error::{InvokeError, LoadError};
use crate::plugin::types::{ModuleOpener, Spider, SpiderMethod, SpiderModule, SpiderResult};
use libloading::{Library, Symbol};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;
use std::sync::Arc;

const STATUS_OK: c_int = 0;
const STATUS_NOT_FOUND: c_int = 1;

type NewFn = unsafe extern "C" fn(*const c_char, *mut *mut c_void) -> c_int;
type InvokeFn = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *mut *mut c_char) -> c_int;
type FreeFn = unsafe extern "C" fn(*mut c_char);
type DropFn = unsafe extern "C" fn(*mut c_void);
type ModuleInitFn = unsafe extern "C" fn() -> c_int;

/// Opens spider modules with `libloading`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOpener;

impl ModuleOpener for NativeOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn SpiderModule>, LoadError> {
        let module_open = |reason: String| LoadError::ModuleOpen {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(module_open("file not found".to_string()));
        }

        // Loading runs the library's initializers; artifacts reach this point
        // only after the artifact manager has verified them.
        let library = unsafe { Library::new(path) }.map_err(|e| module_open(e.to_string()))?;

        let has_entry = unsafe { library.get::<NewFn>(b"spider_new") }.is_ok()
            && unsafe { library.get::<InvokeFn>(b"spider_invoke") }.is_ok();
        if !has_entry {
            return Err(module_open("missing spider_new/spider_invoke exports".to_string()));
        }

        tracing::info!(path = ?path, "Native spider module opened");
        Ok(Arc::new(NativeModule {
            library: Arc::new(library),
        }))
    }
}

struct NativeModule {
    library: Arc<Library>,
}

impl SpiderModule for NativeModule {
    fn init_module(&self) -> Result<(), String> {
        let init: Symbol<ModuleInitFn> = match unsafe { self.library.get(b"spider_module_init") } {
            Ok(symbol) => symbol,
            Err(_) => return Ok(()),
        };
        match unsafe { init() } {
            STATUS_OK => Ok(()),
            code => Err(format!("spider_module_init returned {}", code)),
        }
    }

    fn instantiate(&self, type_name: &str) -> Result<Option<Box<dyn Spider>>, String> {
        let new_fn: Symbol<NewFn> =
            unsafe { self.library.get(b"spider_new") }.map_err(|e| e.to_string())?;
        let type_name = CString::new(type_name).map_err(|e| e.to_string())?;

        let mut handle: *mut c_void = std::ptr::null_mut();
        let code = unsafe { new_fn(type_name.as_ptr(), &mut handle) };
        match code {
            STATUS_OK if !handle.is_null() => Ok(Some(Box::new(NativeSpider {
                library: self.library.clone(),
                handle,
            }))),
            STATUS_OK => Err("spider_new returned a null instance".to_string()),
            STATUS_NOT_FOUND => Ok(None),
            code => Err(format!("spider_new returned {}", code)),
        }
    }
}

/// One native spider instance
struct NativeSpider {
    library: Arc<Library>,
    handle: *mut c_void,
}

// The handle is only touched through `&mut self`, and the loader serializes
// every call into one instance.
unsafe impl Send for NativeSpider {}

impl NativeSpider {
    fn invoke(&mut self, method: SpiderMethod, params: Value) -> SpiderResult {
        let failed = |reason: String| InvokeError::Failed {
            method: method.name().to_string(),
            reason,
        };

        let invoke: Symbol<InvokeFn> =
            unsafe { self.library.get(b"spider_invoke") }.map_err(|e| failed(e.to_string()))?;
        let method_c = CString::new(method.name()).map_err(|e| failed(e.to_string()))?;
        let params_c = CString::new(params.to_string()).map_err(|e| failed(e.to_string()))?;

        let mut result: *mut c_char = std::ptr::null_mut();
        let code = unsafe { invoke(self.handle, method_c.as_ptr(), params_c.as_ptr(), &mut result) };

        let text = if result.is_null() {
            None
        } else {
            let text = unsafe { CStr::from_ptr(result) }.to_string_lossy().into_owned();
            self.free(result);
            Some(text)
        };

        status_to_result(method, code, text)
    }

    /// Release a result string with the module's allocator when it exports one
    fn free(&self, ptr: *mut c_char) {
        match unsafe { self.library.get::<FreeFn>(b"spider_free") } {
            Ok(free_fn) => unsafe { free_fn(ptr) },
            Err(_) => unsafe { libc::free(ptr as *mut libc::c_void) },
        }
    }
}

impl Drop for NativeSpider {
    fn drop(&mut self) {
        if let Ok(drop_fn) = unsafe { self.library.get::<DropFn>(b"spider_drop") } {
            unsafe { drop_fn(self.handle) };
        }
    }
}

impl Spider for NativeSpider {
    fn init(&mut self, extend: &str) -> Result<(), InvokeError> {
        self.invoke(SpiderMethod::Init, init_params(extend)).map(|_| ())
    }

    fn home_content(&mut self, filter: bool) -> SpiderResult {
        self.invoke(SpiderMethod::Home, json!({ "filter": filter }))
    }

    fn category_content(&mut self, tid: &str, page: &str, filter: bool, extend: &BTreeMap<String, String>) -> SpiderResult {
        self.invoke(SpiderMethod::Category, category_params(tid, page, filter, extend))
    }

    fn detail_content(&mut self, ids: &[String]) -> SpiderResult {
        self.invoke(SpiderMethod::Detail, json!({ "ids": ids }))
    }

    fn player_content(&mut self, flag: &str, id: &str, vip_flags: &[String]) -> SpiderResult {
        self.invoke(SpiderMethod::Play, json!({ "flag": flag, "id": id, "vipFlags": vip_flags }))
    }

    fn search_content(&mut self, key: &str, quick: bool) -> SpiderResult {
        self.invoke(SpiderMethod::Search, json!({ "key": key, "quick": quick }))
    }
}

fn init_params(extend: &str) -> Value {
    json!({ "extend": extend })
}

fn category_params(tid: &str, page: &str, filter: bool, extend: &BTreeMap<String, String>) -> Value {
    json!({ "tid": tid, "pg": page, "filter": filter, "extend": extend })
}

fn status_to_result(method: SpiderMethod, code: c_int, text: Option<String>) -> SpiderResult {
    match code {
        STATUS_OK => Ok(text),
        STATUS_NOT_FOUND => Err(InvokeError::MissingMethod(method.name().to_string())),
        code => Err(InvokeError::Failed {
            method: method.name().to_string(),
            reason: match text {
                Some(message) if !message.is_empty() => format!("status {}: {}", code, message),
                _ => format!("status {}", code),
            },
        }),
    }
}
