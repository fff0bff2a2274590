//! Parsing of connection strings like `ipbustcp-2.0://localhost:60002`
use super::{
    tcp::Tcp,
    udp::Udp,
    Error,
    Transport,
    TransportResult,
};
use nom::{
    bytes::complete::{
        tag,
        take_till1,
        take_until1,
    },
    character::complete::{
        char,
        digit1,
    },
    combinator::{
        all_consuming,
        map_res,
    },
    sequence::{
        preceded,
        terminated,
    },
    IResult,
};
use std::{
    fmt,
    str::FromStr,
};

/// The transport a connection string selects
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Udp,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "ipbustcp-2.0",
            Scheme::Udp => "ipbusudp-2.0",
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipbustcp-2.0" => Ok(Scheme::Tcp),
            "ipbusudp-2.0" => Ok(Scheme::Udp),
            _ => Err(Error::UnsupportedScheme(s.to_owned())),
        }
    }
}

/// A parsed `protocol://host:port` connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

fn scheme(input: &str) -> IResult<&str, &str> {
    terminated(take_until1("://"), tag("://"))(input)
}

fn host(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c == ':' || c == '/')(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    map_res(preceded(char(':'), digit1), |s: &str| s.parse::<u16>())(input)
}

fn uri(input: &str) -> IResult<&str, (&str, &str, u16)> {
    let (remaining, scheme) = scheme(input)?;
    let (remaining, host) = host(remaining)?;
    let (remaining, port) = port(remaining)?;
    Ok((remaining, (scheme, host, port)))
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (_, (scheme, host, port)) =
            all_consuming(uri)(s).map_err(|_| Error::BadUri(s.to_owned()))?;
        Ok(Self {
            scheme: scheme.parse()?,
            host: host.to_owned(),
            port,
        })
    }
}

impl Uri {
    /// Open the transport this connection string describes
    /// # Errors
    /// Returns an error if the connection can't be established
    pub fn connect(&self) -> TransportResult<Box<dyn Transport + Send>> {
        let addr = (self.host.as_str(), self.port);
        Ok(match self.scheme {
            Scheme::Tcp => Box::new(Tcp::connect(addr)?),
            Scheme::Udp => Box::new(Udp::connect(addr)?),
        })
    }
}
