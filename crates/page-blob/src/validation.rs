use std::path::{Component, Path};

use crate::StoreError;

/// Validates a container name against page blob service rules.
///
/// Rejects:
/// - Names shorter than 3 or longer than 63 characters
/// - Characters other than lowercase ASCII letters, digits and `-`
/// - A leading or trailing `-`, or two `-` in a row
pub fn validate_container_name(name: &str) -> Result<(), StoreError> {
    if !(3..=63).contains(&name.len()) {
        return Err(StoreError::InvalidName(format!(
            "container name must be 3-63 characters: {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(StoreError::InvalidName(format!(
            "container name may only contain lowercase letters, digits and '-': {name}"
        )));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(StoreError::InvalidName(format!(
            "container name has a misplaced '-': {name}"
        )));
    }
    Ok(())
}

/// Validates that a blob name is usable as a relative path inside its
/// container.
///
/// Rejects:
/// - Empty names or names over 1024 characters
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_blob_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty blob name".into()));
    }
    if name.len() > 1024 {
        return Err(StoreError::InvalidName(format!(
            "blob name longer than 1024 characters: {name}"
        )));
    }

    let path = Path::new(name);

    if path.is_absolute() {
        return Err(StoreError::InvalidName(format!(
            "absolute path not allowed: {name}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(StoreError::InvalidName(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(StoreError::InvalidName(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_default_container() {
        assert!(validate_container_name("vhds").is_ok());
        assert!(validate_container_name("disk-images-2024").is_ok());
    }

    #[test]
    fn rejects_bad_container_names() {
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name("Upper").is_err());
        assert!(validate_container_name("-lead").is_err());
        assert!(validate_container_name("trail-").is_err());
        assert!(validate_container_name("dou--ble").is_err());
        assert!(validate_container_name("../etc").is_err());
        assert!(validate_container_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn accepts_blob_names() {
        assert!(validate_blob_name("disk.vhd").is_ok());
        assert!(validate_blob_name("images/2024/disk.vhd").is_ok());
        assert!(validate_blob_name("./disk.vhd").is_ok());
    }

    #[test]
    fn rejects_blob_traversal() {
        assert!(validate_blob_name("").is_err());
        assert!(validate_blob_name("..").is_err());
        assert!(validate_blob_name("../disk.vhd").is_err());
        assert!(validate_blob_name("a/../../escape.vhd").is_err());
        assert!(validate_blob_name("/tmp/disk.vhd").is_err());
        assert!(validate_blob_name(&"x".repeat(1025)).is_err());
    }
}
