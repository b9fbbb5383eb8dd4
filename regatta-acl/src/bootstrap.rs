//! Bootstrap gate: the first management credential, once per cluster
//! incarnation.
//!
//! The persisted watermark (create-index of the last bootstrap token) gates
//! re-bootstrap; operators override it by writing the current watermark into
//! `<data-dir>/acl-bootstrap-reset`. Only the leader reads the file, and
//! the controller never deletes it: the operator removes it after a
//! successful reset.

use camino::{Utf8Path, Utf8PathBuf};
use smol_str::SmolStr;
use time::OffsetDateTime;
use tracing::warn;

use crate::types::{Token, TokenType, BOOTSTRAP_TOKEN_NAME};

pub const RESET_FILE_NAME: &str = "acl-bootstrap-reset";

pub(crate) fn reset_file_path(data_dir: &Utf8Path) -> Utf8PathBuf {
    data_dir.join(RESET_FILE_NAME)
}

/// Reads the operator-written reset index. Absence is the normal state;
/// malformed contents are reported and treated as absent.
pub(crate) fn read_reset_index(data_dir: &Utf8Path) -> Option<u64> {
    let path = reset_file_path(data_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(%path, %error, "failed to read bootstrap reset file");
            return None;
        }
    };

    match contents.trim().parse::<u64>() {
        Ok(index) => Some(index),
        Err(_) => {
            warn!(%path, "bootstrap reset file does not contain a decimal index");
            None
        }
    }
}

/// The management token minted by a successful bootstrap. A caller-supplied
/// secret makes bootstrap reproducible across automation reruns.
pub(crate) fn make_bootstrap_token(operator_secret: Option<SmolStr>, now: OffsetDateTime) -> Token {
    let mut token = Token::new_client(BOOTSTRAP_TOKEN_NAME, Vec::new(), Vec::new());
    token.token_type = TokenType::Management;
    token.global = true;
    token.create_time = now;
    if let Some(secret) = operator_secret {
        token.secret_id = secret;
    }
    token.set_hash();
    token
}
