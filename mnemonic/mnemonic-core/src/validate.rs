//! Input checks against [`Limits`]. Lengths count characters, not bytes.

use crate::config::Limits;
use crate::error::{Error, Result};

const MAX_USER_NAME_LENGTH: usize = 64;

fn bounded(value: &str, max: usize, what: &str) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(Error::invalid(format!(
            "{what} is {len} characters long, the limit is {max}"
        )));
    }
    Ok(())
}

fn required(value: &str, max: usize, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(format!("{what} must not be empty")));
    }
    bounded(value, max, what)
}

pub fn file_name(limits: &Limits, name: &str) -> Result<()> {
    required(name, limits.max_file_name_length, "file name")?;
    if name.chars().any(char::is_control) {
        return Err(Error::invalid("file name contains control characters"));
    }
    Ok(())
}

pub fn narration(limits: &Limits, narration: &str) -> Result<()> {
    bounded(narration, limits.max_file_narration_length, "narration")
}

pub fn payload(limits: &Limits, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::invalid("file data must not be empty"));
    }
    if data.len() as u64 > limits.max_file_size {
        return Err(Error::invalid(format!(
            "file is {} bytes, the limit is {}",
            data.len(),
            limits.max_file_size
        )));
    }
    Ok(())
}

pub fn version_comment(limits: &Limits, comment: &str) -> Result<()> {
    bounded(comment, limits.max_version_comment_length, "version comment")
}

pub fn aspect(limits: &Limits, name: Option<&str>, description: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        required(name, limits.max_aspect_name_length, "aspect name")?;
    }
    if let Some(description) = description {
        bounded(description, limits.max_aspect_description_length, "aspect description")?;
    }
    Ok(())
}

/// Aspect groups share the aspect limits.
pub fn aspect_group(limits: &Limits, name: Option<&str>, description: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        required(name, limits.max_aspect_name_length, "aspect group name")?;
    }
    if let Some(description) = description {
        bounded(description, limits.max_aspect_description_length, "aspect group description")?;
    }
    Ok(())
}

pub fn briefcase(limits: &Limits, name: Option<&str>, description: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        required(name, limits.max_briefcase_name_length, "briefcase name")?;
    }
    if let Some(description) = description {
        bounded(description, limits.max_briefcase_description_length, "briefcase description")?;
    }
    Ok(())
}

pub fn collection(limits: &Limits, name: Option<&str>, description: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        required(name, limits.max_collection_name_length, "collection name")?;
    }
    if let Some(description) = description {
        bounded(description, limits.max_collection_description_length, "collection description")?;
    }
    Ok(())
}

pub fn url(limits: &Limits, url: &str) -> Result<()> {
    required(url, limits.max_url_length, "url")
}

pub fn note(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::invalid("note content must not be empty"));
    }
    Ok(())
}

/// Names double as directory names, so only `[A-Za-z0-9_.-]` is allowed.
pub fn user_name(name: &str) -> Result<()> {
    let compliant = !name.is_empty()
        && name.len() <= MAX_USER_NAME_LENGTH
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !compliant {
        return Err(Error::invalid(format!("user name {name:?} is not allowed")));
    }
    Ok(())
}
