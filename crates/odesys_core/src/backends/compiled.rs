use super::Evaluator;
use crate::codegen::CModule;
use crate::error::BackendError;
use crate::odesys::SymbolicSystem;
use libloading::Library;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;
use tempfile::TempDir;

/// `void kernel(double t, const double *y, const double *p, double *out)`
type Kernel = unsafe extern "C" fn(f64, *const f64, *const f64, *mut f64);

/// External C compiler used to build shared libraries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toolchain {
    pub compiler: String,
    pub flags: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            compiler: "cc".to_string(),
            flags: ["-O2", "-shared", "-fPIC"].map(String::from).to_vec(),
        }
    }
}

impl Toolchain {
    /// Reads the compiler from `CC` and extra flags from `ODESYS_CFLAGS`.
    pub fn from_env() -> Self {
        let mut toolchain = Self::default();
        if let Ok(cc) = env::var("CC") {
            if !cc.trim().is_empty() {
                toolchain.compiler = cc.trim().to_string();
            }
        }
        if let Ok(extra) = env::var("ODESYS_CFLAGS") {
            toolchain
                .flags
                .extend(extra.split_whitespace().map(str::to_string));
        }
        toolchain
    }

    /// Whether the compiler can be started at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.compiler)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Compiles `source` into a shared library inside `dir`.
    fn build(&self, module: &str, source: &str, dir: &Path) -> Result<PathBuf, BackendError> {
        let source_file = dir.join(format!("{module}.c"));
        fs::write(&source_file, source)?;
        let library = dir.join(format!(
            "{}{module}.{}",
            env::consts::DLL_PREFIX,
            env::consts::DLL_EXTENSION
        ));

        let output = Command::new(&self.compiler)
            .args(&self.flags)
            .arg("-o")
            .arg(&library)
            .arg(&source_file)
            .arg("-lm")
            .output()
            .map_err(|source| BackendError::CompilerUnavailable {
                compiler: self.compiler.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(BackendError::Build {
                compiler: self.compiler.clone(),
                source_file,
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.trim().is_empty() {
            warn!("{} reported diagnostics for {module}:\n{stderr}", self.compiler);
        }
        Ok(library)
    }
}

/// A loaded shared library.
///
/// On Unix the build directory is deleted as soon as the library is mapped.
/// Elsewhere the directory is kept next to the library, which is declared
/// first so it is unloaded before the directory is removed.
struct LoadedModule {
    rhs: Kernel,
    jac: Kernel,
    _library: Library,
    _dir: Option<TempDir>,
}

fn module_cache() -> &'static Mutex<HashMap<String, Arc<LoadedModule>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<LoadedModule>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn build_dir() -> Result<TempDir, BackendError> {
    Ok(tempfile::Builder::new().prefix("odesys-").tempdir()?)
}

fn load_module(
    module: &str,
    source: &str,
    toolchain: &Toolchain,
    dir: TempDir,
) -> Result<LoadedModule, BackendError> {
    let started = Instant::now();
    let path = toolchain.build(module, source, dir.path())?;

    let load_error = |source| BackendError::Load {
        module: module.to_string(),
        source,
    };
    // SAFETY: the library was just generated from our own source and has no
    // initialisers; the kernels match the `Kernel` signature emitted by
    // `CModule::source`.
    let (library, rhs, jac) = unsafe {
        let library = Library::new(&path).map_err(load_error)?;
        let rhs = *library
            .get::<Kernel>(format!("{module}_f\0").as_bytes())
            .map_err(load_error)?;
        let jac = *library
            .get::<Kernel>(format!("{module}_j\0").as_bytes())
            .map_err(load_error)?;
        (library, rhs, jac)
    };

    info!("compiled module {module} in {:?}", started.elapsed());
    Ok(LoadedModule {
        rhs,
        jac,
        _library: library,
        _dir: release_build_dir(dir),
    })
}

#[cfg(unix)]
fn release_build_dir(dir: TempDir) -> Option<TempDir> {
    // the mapping stays valid once the file is unlinked
    let path = dir.path().to_path_buf();
    match dir.close() {
        Ok(()) => debug!("removed build directory {}", path.display()),
        Err(err) => warn!("could not remove build directory {}: {err}", path.display()),
    }
    None
}

#[cfg(not(unix))]
fn release_build_dir(dir: TempDir) -> Option<TempDir> {
    Some(dir)
}

/// Native evaluator backed by a C shared library.
pub struct CompiledBackend {
    module_name: String,
    module: Arc<LoadedModule>,
    dim: usize,
    n_params: usize,
}

impl CompiledBackend {
    pub fn new(system: &SymbolicSystem, toolchain: &Toolchain) -> Result<Self, BackendError> {
        let jacobian: Vec<_> = system.jacobian().iter().flatten().cloned().collect();
        let generated = CModule::generate(
            system.rhs(),
            &jacobian,
            system.states(),
            system.params(),
            system.time(),
        )?;
        let module_name = format!("odesys_{:016x}", generated.fingerprint());

        // The lock is held while compiling so each module is built once.
        let mut cache = module_cache()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let module = match cache.get(&module_name) {
            Some(module) => {
                debug!("module {module_name} found in cache");
                Arc::clone(module)
            }
            None => {
                let loaded = Arc::new(load_module(
                    &module_name,
                    &generated.source(&module_name),
                    toolchain,
                    build_dir()?,
                )?);
                cache.insert(module_name.clone(), Arc::clone(&loaded));
                loaded
            }
        };

        Ok(Self {
            module_name,
            module,
            dim: system.states().len(),
            n_params: system.params().len(),
        })
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    fn call(&self, kernel: Kernel, t: f64, y: &[f64], params: &[f64], out: &mut [f64], len: usize) {
        if y.len() < self.dim || params.len() < self.n_params || out.len() < len {
            out.fill(f64::NAN);
            return;
        }
        // SAFETY: the kernel reads `dim` states and `n_params` parameters and
        // writes `len` outputs; all three slices were checked above.
        unsafe { kernel(t, y.as_ptr(), params.as_ptr(), out.as_mut_ptr()) }
    }
}

impl Evaluator for CompiledBackend {
    fn f_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        self.call(self.module.rhs, t, y, params, out, self.dim);
    }

    fn j_eval(&self, t: f64, y: &[f64], params: &[f64], out: &mut [f64]) {
        self.call(self.module.jac, t, y, params, out, self.dim * self.dim);
    }
}
