use std::collections::BTreeSet;

use crate::domain::Observation;
use crate::error::{Result, VaxError};
use crate::sources::ObservationInput;
use crate::taxonomy;

/// Validate one observation against the cross-field invariants and build
/// its canonical form.
///
/// Checks run in a fixed order, each with a distinct failure: dose
/// ordering, one-dose synthesis, non-regression against `prior`, and
/// percentage bounds. The one-dose synthesis is the only implicit field
/// the validator may fill in; every other absent field stays unknown.
pub fn validate(
    input: &ObservationInput,
    vaccines: &BTreeSet<String>,
    prior: Option<&Observation>,
    single_dose_only: bool,
) -> Result<Observation> {
    if vaccines.is_empty() {
        return Err(VaxError::MissingField(format!(
            "vaccine for {} on {}",
            input.location, input.date
        )));
    }

    let mut observation = Observation {
        location: input.location.clone(),
        date: input.date,
        total_vaccinations: input.total_vaccinations,
        people_vaccinated: input.people_vaccinated,
        people_fully_vaccinated: input.people_fully_vaccinated,
        total_boosters: input.total_boosters,
        vaccine: taxonomy::render(vaccines),
        source_url: input.source_url.clone(),
    };

    check_dose_order(&observation)?;

    // A one-dose regimen fully vaccinates on the first dose.
    if single_dose_only && observation.people_fully_vaccinated.is_none() {
        observation.people_fully_vaccinated = observation.people_vaccinated;
    }

    if let Some(prior) = prior {
        if prior.date < observation.date {
            check_non_regression(prior, &observation)?;
        }
    }

    check_percentages(input)?;

    Ok(observation)
}

/// Pairwise dose-ordering invariant over all present fields:
/// total >= people >= fully >= boosters.
fn check_dose_order(obs: &Observation) -> Result<()> {
    let fields = obs.cumulative_fields();
    for i in 0..fields.len() {
        for j in (i + 1)..fields.len() {
            let (upper_field, upper) = fields[i];
            let (lower_field, lower) = fields[j];
            if let (Some(upper), Some(lower)) = (upper, lower) {
                if lower > upper {
                    return Err(VaxError::DoseOrder {
                        location: obs.location.clone(),
                        date: obs.date,
                        upper_field,
                        upper,
                        lower_field,
                        lower,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Cumulative counters never regress between an earlier and a later
/// observation; checked field by field over the fields both report.
pub fn check_non_regression(earlier: &Observation, later: &Observation) -> Result<()> {
    for ((field, prior), (_, current)) in earlier
        .cumulative_fields()
        .into_iter()
        .zip(later.cumulative_fields())
    {
        if let (Some(prior), Some(current)) = (prior, current) {
            if current < prior {
                return Err(VaxError::Regression {
                    location: later.location.clone(),
                    field: field.to_string(),
                    prior_date: earlier.date,
                    prior,
                    date: later.date,
                    current,
                });
            }
        }
    }
    Ok(())
}

fn check_percentages(input: &ObservationInput) -> Result<()> {
    let bounds = [
        (
            "people_vaccinated_per_hundred",
            input.people_vaccinated_per_hundred,
        ),
        (
            "people_fully_vaccinated_per_hundred",
            input.people_fully_vaccinated_per_hundred,
        ),
    ];
    for (field, value) in bounds {
        if let Some(value) = value {
            if value > 100.0 {
                return Err(VaxError::PercentageBound {
                    location: input.location.clone(),
                    date: input.date,
                    field,
                    value,
                });
            }
        }
    }
    Ok(())
}

/// Whole-series invariant: date-ascending, at most one observation per
/// date, cumulative fields non-decreasing between consecutive entries.
/// Used by the batch-replacement path and by tests.
pub fn validate_series(observations: &[Observation]) -> Result<()> {
    for pair in observations.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        if later.date <= earlier.date {
            return Err(VaxError::SourceShape(format!(
                "series for {} is not strictly date-ascending around {}",
                later.location, later.date
            )));
        }
        check_non_regression(earlier, later)?;
    }
    Ok(())
}
