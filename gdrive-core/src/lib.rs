mod client;
mod oauth;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, FileList, FOLDER_MIME_TYPE, MediaStream,
};
pub use oauth::{ClientSecrets, DRIVE_READONLY_SCOPE, OAuthClient, OAuthError, OAuthToken};
