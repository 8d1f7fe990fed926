//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: Security-focused validation to prevent SSRF attacks
//! - **HTML handling**: Tag stripping for untrusted feed markup
//!
//! # Examples
//!
//! ```
//! use fhirsite::util::{html_to_paragraphs, validate_url};
//!
//! // Validate an upstream feed URL
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//!
//! // Reduce feed HTML to plain paragraphs
//! assert_eq!(html_to_paragraphs("<p>One</p><p>Two</p>"), vec!["One", "Two"]);
//! ```

mod html;
mod url_validator;

pub use html::html_to_paragraphs;
pub use url_validator::{validate_url, UrlValidationError};

/// Maximum allowed search query length, shared by the catalog and its HTTP handlers
pub const MAX_SEARCH_QUERY_LENGTH: usize = 256;
