#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    // --------------------------------- source map errors -----------------------------------------
    #[error("source map decode error: {0}")]
    SourceMap(#[from] ::sourcemap::Error),
    #[error("unsupported source map url: {0}")]
    SourceMapUrl(String),

    // --------------------------------- runtime errors --------------------------------------------
    #[error("runtime transport error: {0}")]
    Transport(Box<tungstenite::Error>),
    #[error("malformed runtime message: {0}")]
    MalformedRuntimeMessage(String),
    #[error("runtime connection closed")]
    RuntimeClosed,

    // --------------------------------- config errors ---------------------------------------------
    #[error("config file parsing error: {0}")]
    Config(#[from] toml::de::Error),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "jsdap", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "jsdap", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
