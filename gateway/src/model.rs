//! Forecast request as it is sent to the calculation module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regression model the calculation module fits to the historic usages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastModel {
    Linear,
    Logarithmic,
    Polynomial,
}

impl ForecastModel {
    pub const ALL: [ForecastModel; 3] = [
        ForecastModel::Linear,
        ForecastModel::Logarithmic,
        ForecastModel::Polynomial,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ForecastModel::Linear => "linear",
            ForecastModel::Logarithmic => "logarithmic",
            ForecastModel::Polynomial => "polynomial",
        }
    }
}

impl fmt::Display for ForecastModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownModel;

impl FromStr for ForecastModel {
    type Err = UnknownModel;

    // Exact, case sensitive match on the path token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ForecastModel::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or(UnknownModel)
    }
}

/// Message body published for the calculation module
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    pub model: ForecastModel,
    /// Area keys in the order the caller supplied them
    pub keys: Vec<String>,
    /// Consumer groups to include, never empty once validated
    pub consumer_groups: Vec<String>,
    #[serde(rename = "forecastSize")]
    pub forecasted_years: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exactly_the_three_models() {
        assert_eq!("linear".parse(), Ok(ForecastModel::Linear));
        assert_eq!("logarithmic".parse(), Ok(ForecastModel::Logarithmic));
        assert_eq!("polynomial".parse(), Ok(ForecastModel::Polynomial));

        for token in [
            "Linear",
            "LINEAR",
            "polynomial ",
            "exponential",
            "",
            "bogus",
            "linear/",
        ] {
            assert_eq!(token.parse::<ForecastModel>(), Err(UnknownModel), "{token:?}");
        }
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for model in ForecastModel::ALL {
            assert_eq!(model.to_string().parse(), Ok(model));
        }
    }

    #[test]
    fn wire_format() {
        let request = ForecastRequest {
            model: ForecastModel::Linear,
            keys: vec!["A01".into(), "A02".into()],
            consumer_groups: vec!["households".into()],
            forecasted_years: 20,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "model": "linear",
                "keys": ["A01", "A02"],
                "consumerGroups": ["households"],
                "forecastSize": 20
            })
        );
    }
}
