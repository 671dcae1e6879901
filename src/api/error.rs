use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid host: {0}")]
    InvalidHost(String),
    #[error("timeout while fetching data from the device")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    Parse(String),
    #[error("no snapshot fetched yet")]
    NotReady,
    #[error("error encoding output")]
    Format,
}

/* Route handlers return Result<_, Error>; map the taxonomy onto HTTP statuses. */
impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = match self {
            Error::NotReady => Status::ServiceUnavailable,
            Error::Timeout => Status::GatewayTimeout,
            Error::Transport(_) | Error::Parse(_) => Status::BadGateway,
            Error::InvalidHost(_) | Error::Format => Status::InternalServerError,
        };
        let body = format!("{}\n", self);

        Response::build()
            .status(status)
            .sized_body(body.len(), Cursor::new(body))
            .header(ContentType::Plain)
            .ok()
    }
}
