use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Timelike,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

pub const TIMEZONE_ENV_VAR: &str =
  "WLB_TIMEZONE";

const LOCAL_INPUT_FORMATS: [&str; 3] = [
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%dT%H:%M:%S"
];

/// Resolves the zone that defines "local" for day filtering and input.
///
/// `WLB_TIMEZONE` wins over the configured value; anything unparseable
/// falls through to the next source and finally to UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  tracing::debug!(
    "no timezone configured; using UTC"
  );
  chrono_tz::UTC
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  dt.with_timezone(tz).date_naive()
}

/// Calendar-day equality in `tz`, not a rolling 24h window.
#[must_use]
pub fn is_same_local_day(
  a: DateTime<Utc>,
  b: DateTime<Utc>,
  tz: &Tz
) -> bool {
  local_date(a, tz) == local_date(b, tz)
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

/// `dt` shifted by `minutes`, or `None` when the result leaves chrono's
/// representable range.
#[must_use]
pub fn add_minutes(
  dt: DateTime<Utc>,
  minutes: i64
) -> Option<DateTime<Utc>> {
  Duration::try_minutes(minutes)
    .and_then(|delta| {
      dt.checked_add_signed(delta)
    })
}

/// Local wall-clock time with the minutes rounded up to the next half
/// hour and the seconds dropped: 10:07 becomes 10:30, 10:45 becomes 11:00,
/// 10:00 stays 10:00.
#[must_use]
pub fn next_half_hour(
  now: DateTime<Utc>,
  tz: &Tz
) -> NaiveDateTime {
  let local = now
    .with_timezone(tz)
    .naive_local();
  let rounded =
    local.minute().div_ceil(30) * 30;
  let hour_start = local
    .date()
    .and_hms_opt(local.hour(), 0, 0)
    .unwrap_or(local);
  hour_start
    + Duration::minutes(i64::from(
      rounded
    ))
}

pub fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime {local_naive} \
         does not exist in {tz}: \
         {context}"
      ))
    }
  }
}

/// Parses a user-entered due time, interpreted in `tz`.
///
/// Accepts `now`, `today`, `tomorrow`, a clock time (`18:00`, today),
/// a day word followed by a clock time (`tomorrow 9:30`), a date
/// (`2026-05-01`), a local date-time (`2026-05-01 18:00` or
/// `2026-05-01T18:00`), an RFC 3339 instant, or a relative offset
/// (`+2h`, `-30m`, `+1d`).
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_datetime_input(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "empty date/time"
    ));
  }
  let lower =
    token.to_ascii_lowercase();

  if lower == "now" {
    return Ok(now);
  }

  if let Some(date) =
    parse_day_word(&lower, now, tz)
  {
    return to_utc_from_local(
      date.and_time(NaiveTime::MIN),
      tz,
      "day-word"
    );
  }

  if let Some((day, clock)) =
    lower.split_once(char::is_whitespace)
    && let Some(date) =
      parse_day_word(day, now, tz)
  {
    let time =
      parse_clock_time(clock.trim())
        .ok_or_else(|| {
          anyhow!(
            "invalid clock time: {clock}"
          )
        })?;
    return to_utc_from_local(
      date.and_time(time),
      tz,
      "day-word-clock"
    );
  }

  if let Some(time) =
    parse_clock_time(token)
  {
    let date = local_date(now, tz);
    return to_utc_from_local(
      date.and_time(time),
      tz,
      "clock-time"
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return to_utc_from_local(
      date.and_time(NaiveTime::MIN),
      tz,
      "date"
    );
  }

  for format in LOCAL_INPUT_FORMATS {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, format
      )
    {
      return to_utc_from_local(
        naive, tz, "local-datetime"
      );
    }
  }

  if let Ok(instant) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      instant.with_timezone(&Utc)
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .unwrap_or("+");
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .unwrap_or_default()
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("d") => {
        Duration::try_days(num)
      }
      | Some("h") => {
        Duration::try_hours(num)
      }
      | Some("m") => {
        Duration::try_minutes(num)
      }
      | other => {
        return Err(anyhow!(
          "unknown relative unit: \
           {other:?}"
        ));
      }
    }
    .ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    })?;
    let shifted = if sign == "-" {
      now.checked_sub_signed(duration)
    } else {
      now.checked_add_signed(duration)
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    });
  }

  Err(anyhow!(
    "unrecognized date/time: {token}"
  ))
}

fn parse_day_word(
  word: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> Option<NaiveDate> {
  let today = local_date(now, tz);
  match word {
    | "today" => Some(today),
    | "tomorrow" => today.succ_opt(),
    | "yesterday" => today.pred_opt(),
    | _ => None
  }
}

fn parse_clock_time(
  raw: &str
) -> Option<NaiveTime> {
  let (h, m) = raw.split_once(':')?;
  if h.is_empty()
    || h.len() > 2
    || m.len() != 2
  {
    return None;
  }
  let hour: u32 = h.parse().ok()?;
  let minute: u32 = m.parse().ok()?;
  NaiveTime::from_hms_opt(
    hour, minute, 0
  )
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };
  use chrono_tz::Tz;

  use super::*;

  fn berlin() -> Tz {
    "Europe/Berlin"
      .parse()
      .expect("valid tz")
  }

  #[test]
  fn rounds_up_to_next_half_hour() {
    let tz = chrono_tz::UTC;
    let cases = [
      ((10, 7, 12), (10, 30)),
      ((10, 0, 45), (10, 0)),
      ((10, 30, 0), (10, 30)),
      ((10, 45, 0), (11, 0)),
      ((23, 59, 0), (0, 0))
    ];
    for ((h, m, s), (eh, em)) in cases {
      let now = Utc
        .with_ymd_and_hms(
          2026, 2, 17, h, m, s
        )
        .single()
        .expect("valid now");
      let rounded =
        next_half_hour(now, &tz);
      assert_eq!(
        (rounded.hour(), rounded.minute(), rounded.second()),
        (eh, em, 0),
        "{h}:{m}:{s}"
      );
    }
  }

  #[test]
  fn rounding_rolls_over_midnight() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 23, 59, 0
      )
      .single()
      .expect("valid now");
    let rounded = next_half_hour(
      now,
      &chrono_tz::UTC
    );
    assert_eq!(
      rounded.date(),
      NaiveDate::from_ymd_opt(
        2026, 2, 18
      )
      .expect("date")
    );
  }

  #[test]
  fn same_local_day_uses_the_zone() {
    let tz = berlin();
    // 23:30 UTC on the 17th is already the 18th in Berlin.
    let late = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 23, 30, 0
      )
      .single()
      .expect("valid");
    let morning = Utc
      .with_ymd_and_hms(
        2026, 2, 18, 8, 0, 0
      )
      .single()
      .expect("valid");
    assert!(is_same_local_day(
      late, morning, &tz
    ));
    assert!(!is_same_local_day(
      late,
      morning,
      &chrono_tz::UTC
    ));
  }

  #[test]
  fn parses_day_word_with_clock() {
    let tz = berlin();
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed = parse_datetime_input(
      "tomorrow 9:30",
      now,
      &tz
    )
    .expect("parse");
    assert_eq!(
      format_local(parsed, &tz),
      "2026-02-18 09:30"
    );
  }

  #[test]
  fn parses_local_and_relative_inputs() {
    let tz = berlin();
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");

    let local = parse_datetime_input(
      "2026-02-20T18:00",
      now,
      &tz
    )
    .expect("parse local");
    assert_eq!(
      local,
      Utc
        .with_ymd_and_hms(
          2026, 2, 20, 17, 0, 0
        )
        .single()
        .expect("valid")
    );

    let rel = parse_datetime_input(
      "+90m", now, &tz
    )
    .expect("parse relative");
    assert_eq!(
      rel,
      now + Duration::minutes(90)
    );

    assert!(
      parse_datetime_input(
        "someday", now, &tz
      )
      .is_err()
    );
  }

  #[test]
  fn oversized_offsets_are_errors() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let tz = chrono_tz::UTC;
    for input in [
      "+999999999999d",
      "-999999999999d",
      "+9223372036854775807m",
      "+3000000000h"
    ] {
      let err = parse_datetime_input(
        input, now, &tz
      )
      .expect_err(input);
      assert!(
        err
          .to_string()
          .contains("out of range"),
        "{input}: {err}"
      );
    }

    assert_eq!(
      add_minutes(now, i64::MAX / 2),
      None
    );
    assert_eq!(
      add_minutes(now, 90),
      Some(
        now + Duration::minutes(90)
      )
    );
  }

  #[test]
  fn spring_forward_gap_is_rejected() {
    let tz = berlin();
    let missing = NaiveDate::from_ymd_opt(
      2026, 3, 29
    )
    .and_then(|d| {
      d.and_hms_opt(2, 30, 0)
    })
    .expect("naive");
    assert!(
      to_utc_from_local(
        missing, &tz, "test"
      )
      .is_err()
    );
  }
}
