use std::fmt::{Display, Formatter};

use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use log::{debug, error};
use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Catcher, Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::{api::ApiId, mongodb::Id};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not authorized: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("Conflict on voting item {item_id}: {reason}")]
    Conflict { item_id: Id, reason: ConflictReason },
    #[error("Voting item {item_id}: {reason}")]
    State { item_id: Id, reason: StateReason },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error("Bill metadata lookup failed: {0}")]
    BillLookup(#[from] reqwest::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Is this one of the business-rule outcomes, as opposed to an infrastructure failure?
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound(_)
                | Self::Authorization(_)
                | Self::Jwt(_)
                | Self::Conflict { .. }
                | Self::State { .. }
        )
    }

    /// Broad error kind, stable for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::Authorization(_) | Self::Jwt(_) => "AuthorizationError",
            Self::Conflict { .. } => "ConflictError",
            Self::State { .. } => "StateError",
            Self::Db(_) | Self::BillLookup(_) | Self::Internal(_) => "InfrastructureError",
        }
    }

    /// Fine-grained reason code, if this error has one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Validation(e) => Some(e.code()),
            Self::Authorization(e) => Some(e.code()),
            Self::Jwt(_) => Some("InvalidToken"),
            Self::Conflict { reason, .. } => Some(reason.code()),
            Self::State { reason, .. } => Some(reason.code()),
            _ => None,
        }
    }

    /// The voting item this error concerns, if known.
    pub fn item_id(&self) -> Option<Id> {
        match self {
            Self::Conflict { item_id, .. } | Self::State { item_id, .. } => Some(*item_id),
            _ => None,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Authorization(_) => Status::Forbidden,
            Self::Conflict { .. } | Self::State { .. } => Status::Conflict,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Db(_) | Self::BillLookup(_) | Self::Internal(_) => Status::InternalServerError,
        }
    }
}

/// Malformed voting item specs and votes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("a voting item needs at least two options, got {0}")]
    TooFewOptions(usize),
    #[error("end date must be after start date")]
    InvalidWindow,
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("option IDs must be non-empty")]
    EmptyOptionId,
    #[error("option '{0}' is declared more than once")]
    DuplicateOption(String),
    #[error("option '{0}' is not one of this item's options")]
    InvalidOption(String),
    #[error("'{0}' is not a date in YYYY-MM-DD format")]
    InvalidDate(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooFewOptions(_) => "TooFewOptions",
            Self::InvalidWindow => "InvalidWindow",
            Self::EmptyTitle => "EmptyTitle",
            Self::EmptyOptionId => "EmptyOptionId",
            Self::DuplicateOption(_) => "DuplicateOption",
            Self::InvalidOption(_) => "InvalidOption",
            Self::InvalidDate(_) => "InvalidDate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("voter is not eligible to vote on item {0}")]
    NotEligible(Id),
    #[error("this action requires administrator rights")]
    NotPrivileged,
}

impl AuthorizationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotEligible(_) => "NotEligible",
            Self::NotPrivileged => "NotPrivileged",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The voter already has a vote on record for this item.
    DuplicateVote,
}

impl ConflictReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateVote => "DuplicateVote",
        }
    }
}

impl Display for ConflictReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateVote => write!(f, "you have already voted on this item"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateReason {
    /// The voting window has not started yet.
    VotingNotOpen,
    /// The voting window has elapsed, or voting was ended early.
    VotingClosed,
}

impl StateReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::VotingNotOpen => "VotingNotOpen",
            Self::VotingClosed => "VotingClosed",
        }
    }
}

impl Display for StateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VotingNotOpen => write!(f, "voting has not opened yet"),
            Self::VotingClosed => write!(f, "voting has closed"),
        }
    }
}

/// Broad error kind for a bare status, used when no [`Error`] is available.
fn kind_for_status(status: Status) -> &'static str {
    match status.code {
        400 | 422 => "ValidationError",
        401 | 403 => "AuthorizationError",
        404 => "NotFoundError",
        409 => "ConflictError",
        _ => "InfrastructureError",
    }
}

/// JSON body sent alongside an error status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_id: Option<ApiId>,
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if self.is_business_error() {
            debug!("Request rejected: {self}");
        } else {
            error!("Request failed: {self}");
        }
        // Don't leak infrastructure details to the caller.
        let message = if self.is_business_error() {
            self.to_string()
        } else {
            "The service is currently unavailable".to_string()
        };
        let body = ErrorBody {
            kind: self.kind(),
            code: self.code(),
            item_id: self.item_id().map(ApiId::from),
            message,
        };
        Custom(status, Json(body)).respond_to(req)
    }
}

/// Answers for requests that never produced an [`Error`], such as unmatched
/// routes and unparseable bodies, in the same JSON shape.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> Custom<Json<ErrorBody>> {
    let body = ErrorBody {
        kind: kind_for_status(status),
        code: None,
        item_id: None,
        message: status.reason().unwrap_or("Request failed").to_string(),
    };
    Custom(status, Json(body))
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}
