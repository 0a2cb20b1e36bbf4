use aliri_braid::braid;

/// The identifier of an issued security token
///
/// Taken from the assertion ID, the security context identifier, or a reference URI
/// carried in the issuer's response.
#[braid(serde)]
pub struct TokenId;

/// A URI classifying the format of a security token
#[braid(serde)]
pub struct TokenType;

/// A URI naming a requested claim
#[braid(serde)]
pub struct ClaimType;

/// The key under which issued tokens are cached
///
/// Usually the address the token applies to.
#[braid(serde)]
pub struct CacheKey;
