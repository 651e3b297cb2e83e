// Provider A: SOAP/XML availability service.
//
// The request is a hand-built envelope; the response is streamed through the
// quick-xml event reader so large availability payloads are never fully
// deserialized into an intermediate tree.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::{
    escape::{escape, unescape},
    events::Event,
    name::QName,
    Reader,
};

use super::{parse_timestamp, FlightProvider};
use crate::config::SoapProviderConfig;
use crate::error::ProviderError;
use crate::model::{CanonicalFlight, SearchQuery};

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SERVICE_NS: &str = "http://flightprovidera.service/";

/// Moves an envelope to the upstream and returns the raw response body.
#[async_trait]
pub trait SoapTransport: Send + Sync + 'static {
    async fn call(&self, action: &str, envelope: String) -> Result<Bytes, ProviderError>;
}

pub struct HttpSoapTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSoapTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    async fn call(&self, action: &str, envelope: String) -> Result<Bytes, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?)
    }
}

/// Flight option exactly as the SOAP service reports it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SoapFlightOption {
    pub flight_no: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub price: Option<String>,
}

pub struct SoapProvider<T: SoapTransport = HttpSoapTransport> {
    name: String,
    soap_action: String,
    transport: T,
    dropped: AtomicUsize,
}

impl SoapProvider<HttpSoapTransport> {
    pub fn from_config(config: &SoapProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let transport = HttpSoapTransport::new(config.endpoint.clone(), timeout)?;
        Ok(Self::new(&config.name, &config.soap_action, transport))
    }
}

impl<T: SoapTransport> SoapProvider<T> {
    pub fn new(name: &str, soap_action: &str, transport: T) -> Self {
        Self {
            name: name.to_string(),
            soap_action: soap_action.to_string(),
            transport,
            dropped: AtomicUsize::new(0),
        }
    }

    fn normalize(&self, options: Vec<SoapFlightOption>) -> Vec<CanonicalFlight> {
        let mut flights = Vec::with_capacity(options.len());
        for option in options {
            match to_canonical(option, &self.name) {
                Ok(flight) => flights.push(flight),
                Err(reason) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(provider = %self.name, %reason, "dropping flight option");
                }
            }
        }
        flights
    }
}

#[async_trait]
impl<T: SoapTransport> FlightProvider for SoapProvider<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CanonicalFlight>, ProviderError> {
        let envelope = build_envelope(query);
        let body = self.transport.call(&self.soap_action, envelope).await?;
        let xml = std::str::from_utf8(&body)
            .map_err(|e| ProviderError::MalformedResponse(format!("response is not UTF-8: {e}")))?;

        let options = parse_response(xml)?;
        Ok(self.normalize(options))
    }

    fn dropped_records(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub fn build_envelope(query: &SearchQuery) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<soapenv:Envelope xmlns:soapenv=\"{}\" xmlns:fa=\"{}\">\n",
        SOAP_ENV_NS, SERVICE_NS
    ));
    xml.push_str("  <soapenv:Header/>\n");
    xml.push_str("  <soapenv:Body>\n");
    xml.push_str("    <fa:availabilitySearch>\n");
    xml.push_str("      <request>\n");
    xml.push_str(&format!(
        "        <origin>{}</origin>\n",
        escape(query.origin())
    ));
    xml.push_str(&format!(
        "        <destination>{}</destination>\n",
        escape(query.destination())
    ));
    xml.push_str(&format!(
        "        <departureDate>{}T00:00:00</departureDate>\n",
        query.departure_date().format("%Y-%m-%d")
    ));
    xml.push_str("      </request>\n");
    xml.push_str("    </fa:availabilitySearch>\n");
    xml.push_str("  </soapenv:Body>\n");
    xml.push_str("</soapenv:Envelope>\n");
    xml
}

/// Extracts every `flightOptions` element. A SOAP fault or a response flagged
/// `hasError` is reported as a non-retryable upstream error.
pub fn parse_response(xml: &str) -> Result<Vec<SoapFlightOption>, ProviderError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut options = Vec::new();
    let mut current: Option<SoapFlightOption> = None;
    let mut has_error = false;
    let mut error_message: Option<String> = None;
    let mut fault: Option<String> = None;
    let mut saw_envelope = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                let end = e.name().as_ref().to_vec();

                match local.as_slice() {
                    b"Envelope" => saw_envelope = true,
                    b"flightOptions" => current = Some(SoapFlightOption::default()),
                    b"hasError" => {
                        has_error = read_leaf(&mut reader, &end)?.eq_ignore_ascii_case("true");
                    }
                    b"errorMessage" => error_message = Some(read_leaf(&mut reader, &end)?),
                    b"faultstring" => fault = Some(read_leaf(&mut reader, &end)?),
                    field => {
                        if let Some(option) = current.as_mut() {
                            match field {
                                b"flightNo" => option.flight_no = read_leaf(&mut reader, &end)?,
                                b"origin" => option.origin = read_leaf(&mut reader, &end)?,
                                b"destination" => {
                                    option.destination = read_leaf(&mut reader, &end)?
                                }
                                b"departuretime" => {
                                    option.departure_time = read_leaf(&mut reader, &end)?
                                }
                                b"arrivaltime" => {
                                    option.arrival_time = read_leaf(&mut reader, &end)?
                                }
                                b"price" => option.price = Some(read_leaf(&mut reader, &end)?),
                                _ => {}
                            }
                        }
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"flightOptions" => {
                if let Some(option) = current.take() {
                    options.push(option);
                }
            }
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    if !saw_envelope {
        return Err(ProviderError::MalformedResponse(
            "missing SOAP envelope".to_string(),
        ));
    }

    if let Some(fault) = fault {
        return Err(ProviderError::Upstream {
            message: format!("SOAP fault: {fault}"),
            is_retryable: false,
        });
    }

    if has_error {
        return Err(ProviderError::Upstream {
            message: error_message.unwrap_or_else(|| "unspecified provider error".to_string()),
            is_retryable: false,
        });
    }

    Ok(options)
}

fn read_leaf(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<String, ProviderError> {
    let raw = reader.read_text(QName(end))?;
    let text = unescape(&raw)
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    Ok(text.trim().to_string())
}

/// Maps one option to the canonical shape. Options with unusable timestamps
/// are rejected rather than given a made-up time.
fn to_canonical(option: SoapFlightOption, provider: &str) -> Result<CanonicalFlight, String> {
    if option.flight_no.is_empty() || option.origin.is_empty() || option.destination.is_empty() {
        return Err(format!("incomplete itinerary identity: {:?}", option));
    }

    let departure_time = parse_timestamp(&option.departure_time).ok_or_else(|| {
        format!(
            "flight {}: bad departure time {:?}",
            option.flight_no, option.departure_time
        )
    })?;
    let arrival_time = parse_timestamp(&option.arrival_time).ok_or_else(|| {
        format!(
            "flight {}: bad arrival time {:?}",
            option.flight_no, option.arrival_time
        )
    })?;

    let price = match option.price.as_deref().filter(|p| !p.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<f64>() {
            Ok(p) if p.is_finite() && p >= 0.0 => Some(p),
            _ => return Err(format!("flight {}: bad price {:?}", option.flight_no, raw)),
        },
    };

    Ok(CanonicalFlight {
        flight_number: option.flight_no,
        origin: option.origin,
        destination: option.destination,
        departure_time: Some(departure_time),
        arrival_time: Some(arrival_time),
        quoted_price: price,
        source_provider: provider.to_string(),
    })
}
