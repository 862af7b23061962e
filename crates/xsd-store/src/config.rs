/// Maximum length of an absolute path, including its trailing null byte.
///
/// Matches the XenStore platform default; a path exactly `ABS_PATH_MAX`
/// bytes long (including the null) is accepted, one byte longer is rejected.
pub const ABS_PATH_MAX: usize = 3072;

/// Builds the per-domain local prefix a relative path is rewritten under.
///
/// Always fits in 21 bytes: `"/local/domain/"` (14) + up to 5 digits of a
/// `u16` domid + the trailing slash.
pub fn domain_prefix(domid: u16) -> String {
    format!("/local/domain/{domid}/")
}
