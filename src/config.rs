use std::env;

pub const DEFAULT_STEP: u32 = 200;
pub const DEFAULT_PATH: &str = "./?.onion;./?/init.onion";
pub const DEFAULT_CPATH: &str = "./?.so";
pub const PATH_ENV: &str = "ONION_PATH";
pub const CPATH_ENV: &str = "ONION_CPATH";

/// 工作线程的启动配置。
///
/// - `path` / `cpath`：模块搜索路径，`;` 分隔的 `?` 模板
/// - `step`：每执行多少条指令调用一次钩子，0 表示不做周期检查
/// - `traceback`：是否安装带栈回溯的错误处理器
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde_support", serde(default))]
pub struct ThreadConfig {
    pub path: String,
    pub cpath: String,
    pub step: u32,
    pub traceback: bool,
}

impl ThreadConfig {
    /// Reads `ONION_PATH` and `ONION_CPATH`, falling back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        ThreadConfig {
            path: lookup(PATH_ENV).unwrap_or_else(|| DEFAULT_PATH.to_string()),
            cpath: lookup(CPATH_ENV).unwrap_or_else(|| DEFAULT_CPATH.to_string()),
            step: DEFAULT_STEP,
            traceback: false,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_cpath(mut self, cpath: &str) -> Self {
        self.cpath = cpath.to_string();
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    pub fn with_traceback(mut self, traceback: bool) -> Self {
        self.traceback = traceback;
        self
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
