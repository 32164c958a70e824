use rand::Rng;

use crate::encoding::to_hex;

/// Returns a random 32-character hex identifier.
///
/// Used for view registration ids and for models created without a comm.
pub fn uuid() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    to_hex(&bytes)
}
