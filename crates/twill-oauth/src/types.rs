pub mod client_metadata;
pub mod metadata;
pub mod request;
pub mod response;
pub mod token;

pub use client_metadata::{ApplicationType, AuthMethod, ClientMetadata};
pub use metadata::{AuthorizationServerMetadata, ResourceServerMetadata};
pub use request::{
    AuthorizeOptions, CallbackParams, CodeChallengeMethod, GrantType, ParParameters,
    RefreshRequestParameters, ResponseType, RevocationRequestParameters, TokenRequestParameters,
};
pub use response::{OAuthErrorBody, ParResponse, TokenResponse, TokenType};
pub use token::TokenSet;
