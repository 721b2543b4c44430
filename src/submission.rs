//! The inbound form payload and how it is decoded and checked.
//!
//! Decoding is lenient: every field is optional and a list field may arrive
//! as a single value. Validation is a separate, explicit step so the
//! argument builder, [`ArgumentVector`](crate::ArgumentVector), can stay total.

use serde::Deserialize;

use crate::error::RejectError;
use crate::request::Request;

/// A single field value. JSON numbers and booleans are kept as their text.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "ScalarRepr")]
pub struct Scalar(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarRepr {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<ScalarRepr> for Scalar {
    fn from(repr: ScalarRepr) -> Self {
        Self(match repr {
            ScalarRepr::Text(s) => s,
            ScalarRepr::Int(n) => n.to_string(),
            ScalarRepr::Float(n) => n.to_string(),
            ScalarRepr::Bool(b) => b.to_string(),
        })
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Scalar {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A field that accepts either one value or an ordered list of values.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl OneOrMany {
    /// The values in submission order.
    pub fn values(&self) -> &[Scalar] {
        match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(vs) => vs,
        }
    }

    fn push(slot: &mut Option<Self>, value: Scalar) {
        *slot = Some(match slot.take() {
            None => Self::One(value),
            Some(Self::One(first)) => Self::Many(vec![first, value]),
            Some(Self::Many(mut vs)) => {
                vs.push(value);
                Self::Many(vs)
            }
        });
    }
}

/// The parsed form data of one request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Submission {
    pub red: Option<Scalar>,
    pub green: Option<Scalar>,
    pub blue: Option<Scalar>,
    pub shape: Option<OneOrMany>,
    pub surface: Option<OneOrMany>,
    pub model: Option<Scalar>,
}

/// Checks applied to a submission before it reaches the worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct Validation {
    /// Reject submissions that omit a color channel.
    pub require_rgb: bool,
}

impl Submission {
    /// Decodes the body of `req` according to its content type.
    ///
    /// An empty body with no content type decodes to an empty submission.
    pub fn from_request(req: &Request) -> Result<Self, RejectError> {
        match req.media_type().as_deref() {
            Some("application/json") => Self::from_json(req.body()),
            Some("application/x-www-form-urlencoded") => Ok(Self::from_form(req.body())),
            None if req.body().is_empty() => Ok(Self::default()),
            None => Ok(Self::from_form(req.body())),
            Some(other) => Err(RejectError::UnsupportedMediaType(other.to_owned())),
        }
    }

    pub fn from_json(body: &[u8]) -> Result<Self, RejectError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Decodes `application/x-www-form-urlencoded`.
    ///
    /// `shape` and `surface` collect every occurrence (also as `shape[]`).
    /// For the scalar fields the last occurrence wins. Unknown keys are
    /// ignored.
    pub fn from_form(body: &[u8]) -> Self {
        let mut sub = Self::default();
        for (key, value) in form_urlencoded::parse(body) {
            let value = Scalar(value.into_owned());
            match key.trim_end_matches("[]") {
                "red" => sub.red = Some(value),
                "green" => sub.green = Some(value),
                "blue" => sub.blue = Some(value),
                "model" => sub.model = Some(value),
                "shape" => OneOrMany::push(&mut sub.shape, value),
                "surface" => OneOrMany::push(&mut sub.surface, value),
                _ => {}
            }
        }
        sub
    }

    pub fn shapes(&self) -> &[Scalar] {
        match &self.shape {
            Some(field) => field.values(),
            None => &[],
        }
    }

    pub fn surfaces(&self) -> &[Scalar] {
        match &self.surface {
            Some(field) => field.values(),
            None => &[],
        }
    }

    /// Color channels present in the submission must be integers in
    /// `0..=255` written in canonical decimal, since the worker receives
    /// them verbatim; with `require_rgb` they must also be present.
    pub fn validate(&self, rules: &Validation) -> Result<(), RejectError> {
        for (field, value) in [("red", &self.red), ("green", &self.green), ("blue", &self.blue)] {
            match value {
                None if rules.require_rgb => return Err(RejectError::Missing { field }),
                None => {}
                Some(v) => match v.as_str().parse::<u8>() {
                    Ok(n) if n.to_string() == v.as_str() => {}
                    _ => return Err(RejectError::Channel { field, value: v.0.clone() }),
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    fn post(content_type: &str, body: &'static str) -> Request {
        Request::new(
            Method::Post,
            "/rep",
            vec![("content-type".into(), content_type.into())],
            body,
        )
    }

    #[test]
    fn json_accepts_scalar_or_list() {
        let sub = Submission::from_json(
            br#"{"red":10,"green":"20","blue":30,"shape":"circle","surface":["matte","rough"],"model":"A"}"#,
        )
        .unwrap();

        assert_eq!(sub.red, Some("10".into()));
        assert_eq!(sub.green, Some("20".into()));
        assert_eq!(sub.shapes(), &[Scalar::from("circle")]);
        assert_eq!(sub.surfaces(), &[Scalar::from("matte"), Scalar::from("rough")]);
        assert_eq!(sub.model, Some("A".into()));
    }

    #[test]
    fn json_null_and_missing_are_absent() {
        let sub = Submission::from_json(br#"{"red":null,"model":"B"}"#).unwrap();
        assert_eq!(sub.red, None);
        assert_eq!(sub.blue, None);
        assert!(sub.shapes().is_empty());
    }

    #[test]
    fn json_rejects_nested_objects() {
        assert!(Submission::from_json(br#"{"shape":{"a":1}}"#).is_err());
    }

    #[test]
    fn form_repeated_keys_build_lists() {
        let sub = Submission::from_form(b"shape=circle&shape%5B%5D=square&surface=matte&model=B&red=1&red=2");
        assert_eq!(sub.shapes(), &[Scalar::from("circle"), Scalar::from("square")]);
        assert_eq!(sub.surface, Some(OneOrMany::One("matte".into())));
        assert_eq!(sub.red, Some("2".into()));
    }

    #[test]
    fn content_type_dispatch() {
        let json = Submission::from_request(&post("application/json", r#"{"model":"A"}"#)).unwrap();
        assert_eq!(json.model, Some("A".into()));

        let form = Submission::from_request(
            &post("application/x-www-form-urlencoded; charset=utf-8", "model=A+B"),
        )
        .unwrap();
        assert_eq!(form.model, Some("A B".into()));

        let err = Submission::from_request(&post("text/xml", "<a/>")).unwrap_err();
        assert!(matches!(err, RejectError::UnsupportedMediaType(_)));
    }

    #[test]
    fn empty_body_without_content_type() {
        let req = Request::new(Method::Post, "/rep", Vec::new(), "");
        assert_eq!(Submission::from_request(&req).unwrap(), Submission::default());
    }

    #[test]
    fn validation_rejects_out_of_range_channel() {
        let sub = Submission { red: Some("256".into()), ..Default::default() };
        let err = sub.validate(&Validation::default()).unwrap_err();
        assert!(matches!(err, RejectError::Channel { field: "red", .. }));

        let sub = Submission { blue: Some("teal".into()), ..Default::default() };
        assert!(sub.validate(&Validation::default()).is_err());
    }

    #[test]
    fn validation_rejects_non_canonical_channel_text() {
        for value in [" 10", "10 ", "+10", "010", ""] {
            let sub = Submission { green: Some(value.into()), ..Default::default() };
            let err = sub.validate(&Validation::default()).unwrap_err();
            assert!(matches!(err, RejectError::Channel { field: "green", .. }), "accepted {value:?}");
        }

        let sub = Submission { green: Some("0".into()), ..Default::default() };
        assert!(sub.validate(&Validation::default()).is_ok());
    }

    #[test]
    fn validation_allows_absent_channels_unless_required() {
        let sub = Submission { red: Some("0".into()), green: Some("255".into()), ..Default::default() };
        assert!(sub.validate(&Validation::default()).is_ok());

        let err = sub.validate(&Validation { require_rgb: true }).unwrap_err();
        assert!(matches!(err, RejectError::Missing { field: "blue" }));
    }
}
