//! User-facing reply texts

use serde::{Deserialize, Serialize};

/// Texts sent by the registration flow
///
/// Every field can be overridden from the `messages` config block, so
/// deployments can localize replies without rebuilding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    /// Label of the contact-request button
    pub share_phone_button: String,
    /// Menu label of the `/phone` command
    pub phone_command_label: String,
    /// Greeting for `/start`
    pub welcome: String,
    /// Prompt sent after the greeting to unregistered users
    pub request_contact_first: String,
    /// Prompt sent for `/phone`
    pub request_contact: String,
    /// Confirmation after a successful registration
    pub phone_saved: String,
    /// Generic failure while reading or saving the mapping
    pub save_error: String,
    /// Fallback for anything unrecognized
    pub unknown_command: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            share_phone_button: "Share phone number".to_string(),
            phone_command_label: "Share phone number".to_string(),
            welcome: "Welcome!\n\nThank you for choosing our service.".to_string(),
            request_contact_first: "To get started, please share your phone number."
                .to_string(),
            request_contact: "To continue, please share your phone number.".to_string(),
            phone_saved: "Your phone number has been saved.".to_string(),
            save_error: "Something went wrong while saving your phone number.".to_string(),
            unknown_command: "Unknown command.".to_string(),
        }
    }
}
