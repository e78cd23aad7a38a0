// 🌦️ Weather Conditioning
//
// Daily weather has no collision id; `merge_date` is its only join key.
// Each day gets one `weather_condition` by fixed precedence:
//   snow indicator OR snowfall > 0   → Snow
//   rain indicator OR precipitation > 0 → Rain
//   either fog indicator             → Fog
//   otherwise                        → Clear

use super::{rename_resolved, standardize_dates, SourceConditioner, SourceKind};
use crate::columns::{resolve_fields, ColumnMap, FieldSpec, MERGE_DATE, WEATHER_CONDITION, WEATHER_DATE};
use crate::diagnostics::StageReport;
use crate::error::Result;
use crate::table::{parse_number, Row, Table, Value};
use serde::{Deserialize, Serialize};

const SNOW_FLAG: &str = "snow_flag";
const RAIN_FLAG: &str = "rain_flag";
const FOG_FLAG: &str = "fog_flag";
const HEAVY_FOG_FLAG: &str = "heavy_fog_flag";

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required(WEATHER_DATE, &["date", "weather_date", "crash_date"]),
    FieldSpec::optional("precipitation", &["prcp", "precipitation"]),
    FieldSpec::optional("snowfall", &["snow", "snowfall"]),
    FieldSpec::optional("temp_max", &["tmax", "temp_max"]),
    FieldSpec::optional("temp_min", &["tmin", "temp_min"]),
    // NOAA weather-type indicators: WT18 snow, WT16 rain, WT01 fog, WT02 heavy fog
    FieldSpec::optional(SNOW_FLAG, &["wt18"]),
    FieldSpec::optional(RAIN_FLAG, &["wt16"]),
    FieldSpec::optional(FOG_FLAG, &["wt01"]),
    FieldSpec::optional(HEAVY_FOG_FLAG, &["wt02"]),
];

const OUTPUT_COLUMNS: &[&str] = &[
    WEATHER_DATE,
    MERGE_DATE,
    WEATHER_CONDITION,
    "precipitation",
    "snowfall",
    "temp_max",
    "temp_min",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    Snow,
    Rain,
    Fog,
    Clear,
}

/// Evaluation order of the categories. The first satisfied branch wins no
/// matter how many later indicators are also set.
pub const WEATHER_PRECEDENCE: [WeatherCondition; 4] = [
    WeatherCondition::Snow,
    WeatherCondition::Rain,
    WeatherCondition::Fog,
    WeatherCondition::Clear,
];

impl WeatherCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherCondition::Snow => "Snow",
            WeatherCondition::Rain => "Rain",
            WeatherCondition::Fog => "Fog",
            WeatherCondition::Clear => "Clear",
        }
    }
}

/// Everything the categorisation looks at for one day
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherSignals {
    pub snow_flag: bool,
    pub snowfall: Option<f64>,
    pub rain_flag: bool,
    pub precipitation: Option<f64>,
    pub fog_flag: bool,
    pub heavy_fog_flag: bool,
}

impl WeatherSignals {
    fn satisfies(&self, condition: WeatherCondition) -> bool {
        match condition {
            WeatherCondition::Snow => self.snow_flag || self.snowfall.map_or(false, |s| s > 0.0),
            WeatherCondition::Rain => {
                self.rain_flag || self.precipitation.map_or(false, |p| p > 0.0)
            }
            WeatherCondition::Fog => self.fog_flag || self.heavy_fog_flag,
            WeatherCondition::Clear => true,
        }
    }

    pub fn categorize(&self) -> WeatherCondition {
        WEATHER_PRECEDENCE
            .iter()
            .copied()
            .find(|c| self.satisfies(*c))
            .unwrap_or(WeatherCondition::Clear)
    }
}

/// Read one day's signals. An indicator counts as present when non-null.
fn signals_for(row: &Row, table: &Table, resolved: &ColumnMap, bad_numbers: &mut u64) -> WeatherSignals {
    let flag = |canonical: &str| {
        resolved
            .get(canonical)
            .and_then(|raw| table.column_index(raw))
            .map_or(false, |i| row[i].is_some())
    };
    let mut number = |canonical: &str| {
        let idx = resolved.get(canonical).and_then(|raw| table.column_index(raw))?;
        let text = row[idx].as_deref()?;
        let parsed = parse_number(text);
        if parsed.is_none() {
            *bad_numbers += 1;
        }
        parsed
    };

    WeatherSignals {
        snow_flag: flag(SNOW_FLAG),
        snowfall: number("snowfall"),
        rain_flag: flag(RAIN_FLAG),
        precipitation: number("precipitation"),
        fog_flag: flag(FOG_FLAG),
        heavy_fog_flag: flag(HEAVY_FOG_FLAG),
    }
}

pub struct WeatherConditioner;

impl WeatherConditioner {
    pub fn new() -> Self {
        WeatherConditioner
    }
}

impl Default for WeatherConditioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceConditioner for WeatherConditioner {
    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    fn condition(&self, raw: Table) -> Result<(Table, StageReport)> {
        let resolved = resolve_fields("weather", raw.columns(), FIELDS)?;
        let rows_in = raw.len() as u64;
        let mut report = StageReport::new("condition:weather", rows_in);
        let mut table = raw;

        if !table.has_column(WEATHER_CONDITION) {
            let mut bad_numbers = 0u64;
            let conditions: Vec<Value> = table
                .rows()
                .iter()
                .map(|row| {
                    let signals = signals_for(row, &table, &resolved, &mut bad_numbers);
                    Some(signals.categorize().as_str().to_string())
                })
                .collect();
            table.set_column(WEATHER_CONDITION, conditions);
            report.anomaly("unparseable_measurement", None, bad_numbers, rows_in);

            for condition in WEATHER_PRECEDENCE {
                let days = table
                    .column_values(WEATHER_CONDITION)
                    .map(|v| v.iter().filter(|c| **c == Some(condition.as_str())).count())
                    .unwrap_or(0);
                tracing::info!(condition = condition.as_str(), days, "weather category");
            }
        }

        if let Some(raw_date) = resolved.get(WEATHER_DATE) {
            standardize_dates(&mut table, raw_date, WEATHER_DATE, &mut report);
        }
        rename_resolved(&mut table, &resolved);

        let table = table.select(OUTPUT_COLUMNS);
        let rows_out = table.len() as u64;
        Ok((table, report.with_rows_out(rows_out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snow_beats_rain() {
        let signals = WeatherSignals {
            snow_flag: true,
            precipitation: Some(0.4),
            ..Default::default()
        };
        assert_eq!(signals.categorize(), WeatherCondition::Snow);
    }

    #[test]
    fn test_precedence_branches() {
        let snowfall = WeatherSignals {
            snowfall: Some(1.2),
            rain_flag: true,
            fog_flag: true,
            ..Default::default()
        };
        assert_eq!(snowfall.categorize(), WeatherCondition::Snow);

        let rain = WeatherSignals {
            rain_flag: true,
            heavy_fog_flag: true,
            ..Default::default()
        };
        assert_eq!(rain.categorize(), WeatherCondition::Rain);

        let fog = WeatherSignals {
            heavy_fog_flag: true,
            precipitation: Some(0.0),
            ..Default::default()
        };
        assert_eq!(fog.categorize(), WeatherCondition::Fog);

        assert_eq!(WeatherSignals::default().categorize(), WeatherCondition::Clear);
    }

    fn raw_weather() -> Table {
        Table::from_rows(
            vec![
                "STATION".into(),
                "DATE".into(),
                "PRCP".into(),
                "SNOW".into(),
                "TMAX".into(),
                "TMIN".into(),
                "WT01".into(),
                "WT16".into(),
                "WT18".into(),
            ],
            vec![
                vec![Some("USW".into()), Some("2021-01-01".into()), Some("0.3".into()), Some("0".into()), Some("40".into()), Some("30".into()), None, None, Some("1".into())],
                vec![Some("USW".into()), Some("2021-01-02".into()), Some("0.1".into()), Some("0".into()), Some("45".into()), Some("33".into()), None, None, None],
                vec![Some("USW".into()), Some("2021-01-03".into()), Some("0".into()), Some("0".into()), Some("50".into()), Some("35".into()), Some("1".into()), None, None],
                vec![Some("USW".into()), Some("2021-01-04".into()), Some("T".into()), Some("0".into()), Some("52".into()), Some("36".into()), None, None, None],
            ],
        )
    }

    #[test]
    fn test_condition_derives_categories_and_projects() {
        let (table, report) = WeatherConditioner::new().condition(raw_weather()).unwrap();

        assert_eq!(
            table.columns(),
            &[
                WEATHER_DATE.to_string(),
                MERGE_DATE.to_string(),
                WEATHER_CONDITION.to_string(),
                "precipitation".to_string(),
                "snowfall".to_string(),
                "temp_max".to_string(),
                "temp_min".to_string(),
            ]
        );
        assert_eq!(
            table.column_values(WEATHER_CONDITION).unwrap(),
            vec![Some("Snow"), Some("Rain"), Some("Fog"), Some("Clear")]
        );
        assert_eq!(table.value(0, 1), Some("2021-01-01"));
        assert_eq!(report.count_of("unparseable_measurement"), 1);
    }

    #[test]
    fn test_condition_is_idempotent() {
        let (once, _) = WeatherConditioner::new().condition(raw_weather()).unwrap();
        let (twice, _) = WeatherConditioner::new().condition(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
