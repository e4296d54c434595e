/// Enum with HTTP status codes the crate knows a reason phrase for.
///
/// Responses built from a `Status` get the canonical reason derived
/// automatically; anything else can be produced with
/// `Head::response_custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    //  1xx status codes
    Continue,
    SwitchingProtocols,
    //  2xx status codes
    Ok,
    Created,
    Accepted,
    NonAuthoritativeInformation,
    NoContent,
    ResetContent,
    PartialContent,
    //  3xx status codes
    MultipleChoices,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    UseProxy,
    TemporaryRedirect,
    PermanentRedirect,
    //  4xx status codes
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    RequestEntityTooLarge,
    RequestURITooLong,
    UnsupportedMediaType,
    RequestRangeNotSatisfiable,
    ExpectationFailed,
    UpgradeRequired,
    TooManyRequests,
    //  5xx status codes
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    VersionNotSupported,
}

impl Status {
    pub fn code(&self) -> u16 {
        use self::Status::*;
        match *self {
            Continue => 100,
            SwitchingProtocols => 101,
            Ok => 200,
            Created => 201,
            Accepted => 202,
            NonAuthoritativeInformation => 203,
            NoContent => 204,
            ResetContent => 205,
            PartialContent => 206,
            MultipleChoices => 300,
            MovedPermanently => 301,
            Found => 302,
            SeeOther => 303,
            NotModified => 304,
            UseProxy => 305,
            TemporaryRedirect => 307,
            PermanentRedirect => 308,
            BadRequest => 400,
            Unauthorized => 401,
            PaymentRequired => 402,
            Forbidden => 403,
            NotFound => 404,
            MethodNotAllowed => 405,
            NotAcceptable => 406,
            ProxyAuthenticationRequired => 407,
            RequestTimeout => 408,
            Conflict => 409,
            Gone => 410,
            LengthRequired => 411,
            PreconditionFailed => 412,
            RequestEntityTooLarge => 413,
            RequestURITooLong => 414,
            UnsupportedMediaType => 415,
            RequestRangeNotSatisfiable => 416,
            ExpectationFailed => 417,
            UpgradeRequired => 426,
            TooManyRequests => 429,
            InternalServerError => 500,
            NotImplemented => 501,
            BadGateway => 502,
            ServiceUnavailable => 503,
            GatewayTimeout => 504,
            VersionNotSupported => 505,
        }
    }

    pub fn reason(&self) -> &'static str {
        use self::Status::*;
        match *self {
            Continue => "Continue",
            SwitchingProtocols => "Switching Protocols",
            Ok => "OK",
            Created => "Created",
            Accepted => "Accepted",
            NonAuthoritativeInformation => "Non-Authoritative Information",
            NoContent => "No Content",
            ResetContent => "Reset Content",
            PartialContent => "Partial Content",
            MultipleChoices => "Multiple Choices",
            MovedPermanently => "Moved Permanently",
            Found => "Found",
            SeeOther => "See Other",
            NotModified => "Not Modified",
            UseProxy => "Use Proxy",
            TemporaryRedirect => "Temporary Redirect",
            PermanentRedirect => "Permanent Redirect",
            BadRequest => "Bad Request",
            Unauthorized => "Unauthorized",
            PaymentRequired => "Payment Required",
            Forbidden => "Forbidden",
            NotFound => "Not Found",
            MethodNotAllowed => "Method Not Allowed",
            NotAcceptable => "Not Acceptable",
            ProxyAuthenticationRequired => "Proxy Authentication Required",
            RequestTimeout => "Request Timeout",
            Conflict => "Conflict",
            Gone => "Gone",
            LengthRequired => "Length Required",
            PreconditionFailed => "Precondition Failed",
            RequestEntityTooLarge => "Request Entity Too Large",
            RequestURITooLong => "Request-URI Too Long",
            UnsupportedMediaType => "Unsupported Media Type",
            RequestRangeNotSatisfiable => "Requested Range Not Satisfiable",
            ExpectationFailed => "Expectation Failed",
            UpgradeRequired => "Upgrade Required",
            TooManyRequests => "Too Many Requests",
            InternalServerError => "Internal Server Error",
            NotImplemented => "Not Implemented",
            BadGateway => "Bad Gateway",
            ServiceUnavailable => "Service Unavailable",
            GatewayTimeout => "Gateway Timeout",
            VersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Returns a status if the code is one of the known ones
    pub fn from_code(code: u16) -> Option<Status> {
        use self::Status::*;
        match code {
            100 => Some(Continue),
            101 => Some(SwitchingProtocols),
            200 => Some(Ok),
            201 => Some(Created),
            202 => Some(Accepted),
            203 => Some(NonAuthoritativeInformation),
            204 => Some(NoContent),
            205 => Some(ResetContent),
            206 => Some(PartialContent),
            300 => Some(MultipleChoices),
            301 => Some(MovedPermanently),
            302 => Some(Found),
            303 => Some(SeeOther),
            304 => Some(NotModified),
            305 => Some(UseProxy),
            307 => Some(TemporaryRedirect),
            308 => Some(PermanentRedirect),
            400 => Some(BadRequest),
            401 => Some(Unauthorized),
            402 => Some(PaymentRequired),
            403 => Some(Forbidden),
            404 => Some(NotFound),
            405 => Some(MethodNotAllowed),
            406 => Some(NotAcceptable),
            407 => Some(ProxyAuthenticationRequired),
            408 => Some(RequestTimeout),
            409 => Some(Conflict),
            410 => Some(Gone),
            411 => Some(LengthRequired),
            412 => Some(PreconditionFailed),
            413 => Some(RequestEntityTooLarge),
            414 => Some(RequestURITooLong),
            415 => Some(UnsupportedMediaType),
            416 => Some(RequestRangeNotSatisfiable),
            417 => Some(ExpectationFailed),
            426 => Some(UpgradeRequired),
            429 => Some(TooManyRequests),
            500 => Some(InternalServerError),
            501 => Some(NotImplemented),
            502 => Some(BadGateway),
            503 => Some(ServiceUnavailable),
            504 => Some(GatewayTimeout),
            505 => Some(VersionNotSupported),
            _ => None,
        }
    }
}
