//! Flattens a [`Submission`] into the worker's argument vector.
//!
//! The worker is invoked as
//!
//! ```text
//! <interpreter> <target> process rgb <r> <g> <b> shape [<shape>...] surface [<surface>...] model <m>
//! ```
//!
//! Token order is fixed; only the shape and surface runs vary in length. An
//! absent scalar is passed as an empty string so every position is still
//! occupied.

use crate::submission::{OneOrMany, Scalar, Submission};

const PROCESS: &str = "process";
const RGB: &str = "rgb";
const SHAPE: &str = "shape";
const SURFACE: &str = "surface";
const MODEL: &str = "model";

/// Ordered arguments handed to the worker after the interpreter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArgumentVector(Vec<String>);

impl ArgumentVector {
    /// Builds the vector for `target`. Never fails.
    pub fn build(target: &str, sub: &Submission) -> Self {
        let scalar = |v: &Option<Scalar>| v.as_ref().map(|s| s.0.clone()).unwrap_or_default();

        let mut args = Vec::with_capacity(10 + sub.shapes().len() + sub.surfaces().len());
        args.push(target.to_owned());
        args.push(PROCESS.to_owned());
        args.push(RGB.to_owned());
        args.push(scalar(&sub.red));
        args.push(scalar(&sub.green));
        args.push(scalar(&sub.blue));
        args.push(SHAPE.to_owned());
        args.extend(sub.shapes().iter().map(|s| s.0.clone()));
        args.push(SURFACE.to_owned());
        args.extend(sub.surfaces().iter().map(|s| s.0.clone()));
        args.push(MODEL.to_owned());
        args.push(scalar(&sub.model));
        Self(args)
    }

    /// Reads a vector back by token position, returning the target and the
    /// submission it encodes.
    ///
    /// Empty scalars come back as absent and runs of length one as
    /// [`OneOrMany::One`]. Returns `None` if a marker is missing or misplaced.
    pub fn decode(tokens: &[String]) -> Option<(String, Submission)> {
        let (target, rest) = tokens.split_first()?;
        let [process, rgb, red, green, blue, shape, rest @ ..] = rest else {
            return None;
        };
        if process != PROCESS || rgb != RGB || shape != SHAPE {
            return None;
        }

        let [rest @ .., model_marker, model] = rest else {
            return None;
        };
        if model_marker != MODEL {
            return None;
        }

        // A shape literally named `surface` is ambiguous; the first marker wins.
        let surface_at = rest.iter().position(|t| t == SURFACE)?;
        let (shapes, surfaces) = (&rest[..surface_at], &rest[surface_at + 1..]);

        let scalar = |t: &String| (!t.is_empty()).then(|| Scalar(t.clone()));
        let run = |ts: &[String]| match ts {
            [] => None,
            [one] => Some(OneOrMany::One(Scalar(one.clone()))),
            many => Some(OneOrMany::Many(many.iter().cloned().map(Scalar).collect())),
        };

        Some((target.clone(), Submission {
            red: scalar(red),
            green: scalar(green),
            blue: scalar(blue),
            shape: run(shapes),
            surface: run(surfaces),
            model: scalar(model),
        }))
    }

    pub fn target(&self) -> &str {
        &self.0[0]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}
