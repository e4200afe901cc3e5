//! Public review listing, rendered the way the embeddable review block
//! expects: fixed `rcreviews--*` hooks plus overridable utility classes.

use askama::Template;
use chrono::{DateTime, Utc};
use rcreviews_core::StoredReview;
use rcreviews_storage::{ReviewQuery, ReviewQueryResult};
use serde::Deserialize;

const STAR_SVG: &str = include_str!("../assets/star.svg");
const BADGE_SVG: &str = include_str!("../assets/badge.svg");

/// Query attributes of the listing. Names match the embed attributes,
/// including the hyphenated image wrapper class.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShortcodeAttrs {
    pub max_reviews: i64,
    pub shown_reviews: i64,
    pub min_stars: f64,
    pub agent_id: String,
    pub agent_name: String,
    pub view: String,
    pub listing_type: String,
    pub class_section: String,
    pub class_container: String,
    pub class_row: String,
    pub class_article: String,
    pub class_card: String,
    pub class_inner_row: String,
    pub class_rating: String,
    pub class_rating_stars: String,
    pub class_rating_number: String,
    pub class_badge: String,
    pub class_title: String,
    pub class_date: String,
    pub class_content: String,
    pub class_agent: String,
    #[serde(rename = "class_agent_img-wrapper")]
    pub class_agent_img_wrapper: String,
    pub class_agent_img: String,
    pub class_agent_name: String,
    pub class_btn_wrapper: String,
    pub class_btn: String,
    pub class_no_results: String,
}

impl Default for ShortcodeAttrs {
    fn default() -> Self {
        Self {
            max_reviews: -1,
            shown_reviews: 3,
            min_stars: 5.0,
            agent_id: String::new(),
            agent_name: String::new(),
            view: "list".into(),
            listing_type: "agent".into(),
            class_section: String::new(),
            class_container: "container".into(),
            class_row: "row".into(),
            class_article: "col-12 mb-3".into(),
            class_card: "bg-light rounded p-3".into(),
            class_inner_row: "row align-items-center justify-content-between".into(),
            class_rating: "col d-flex align-items-center".into(),
            class_rating_stars: "d-flex align-items-center".into(),
            class_rating_number: "ps-1".into(),
            class_badge: "col text-end".into(),
            class_title: String::new(),
            class_date: String::new(),
            class_content: "mt-2".into(),
            class_agent: "mt-3 d-flex align-items-center".into(),
            class_agent_img_wrapper: "rounded-circle overflow-hidden me-1".into(),
            class_agent_img: String::new(),
            class_agent_name: String::new(),
            class_btn_wrapper: "d-flex justify-content-center".into(),
            class_btn: "btn btn-outline-dark fw-semibold py-3 px-4".into(),
            class_no_results: String::new(),
        }
    }
}

fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl ShortcodeAttrs {
    pub fn unstyled(&self) -> bool {
        self.view == "unstyled"
    }

    pub fn is_agency_listing(&self) -> bool {
        self.listing_type == "agency"
    }

    /// Store filter: rating floor, agent ids/names, and `max_reviews` as the
    /// limit when positive.
    pub fn to_query(&self) -> ReviewQuery {
        ReviewQuery {
            min_rating: Some(self.min_stars),
            agent_ids: comma_list(&self.agent_id),
            agent_names: comma_list(&self.agent_name),
            limit: usize::try_from(self.max_reviews).ok().filter(|n| *n > 0),
        }
    }

    /// Leading-space class suffix, or nothing for the unstyled view.
    fn class(&self, value: &str) -> String {
        if self.unstyled() || value.is_empty() {
            String::new()
        } else {
            format!(" {value}")
        }
    }

    /// Count shown on the "Show N reviews" button, if it should appear.
    pub fn remaining(&self, found: usize) -> Option<i64> {
        let found = i64::try_from(found).unwrap_or(i64::MAX);
        if self.max_reviews > 0 {
            (self.max_reviews > self.shown_reviews).then(|| self.max_reviews - self.shown_reviews)
        } else {
            (found > self.shown_reviews).then(|| found - self.shown_reviews)
        }
    }
}

struct Classes {
    section: String,
    container: String,
    row: String,
    article: String,
    card: String,
    inner_row: String,
    rating: String,
    rating_stars: String,
    rating_number: String,
    badge: String,
    title: String,
    date: String,
    content: String,
    agent: String,
    agent_name: String,
    btn_wrapper: String,
    btn: String,
}

impl Classes {
    fn from_attrs(a: &ShortcodeAttrs) -> Self {
        Self {
            section: a.class(&a.class_section),
            container: a.class(&a.class_container),
            row: a.class(&a.class_row),
            article: a.class(&a.class_article),
            card: a.class(&a.class_card),
            inner_row: a.class(&a.class_inner_row),
            rating: a.class(&a.class_rating),
            rating_stars: a.class(&a.class_rating_stars),
            rating_number: a.class(&a.class_rating_number),
            badge: a.class(&a.class_badge),
            title: a.class(&a.class_title),
            date: a.class(&a.class_date),
            content: a.class(&a.class_content),
            agent: a.class(&a.class_agent),
            agent_name: a.class(&a.class_agent_name),
            btn_wrapper: a.class(&a.class_btn_wrapper),
            btn: a.class(&a.class_btn),
        }
    }
}

struct ReviewCard {
    id: i64,
    agent_id: String,
    visibility: &'static str,
    stars_html: String,
    rating: String,
    title: String,
    age: String,
    content: String,
    agent_name: String,
}

#[derive(Template)]
#[template(path = "reviews.html")]
struct ReviewsTemplate {
    classes: Classes,
    listing_type: String,
    cards: Vec<ReviewCard>,
    show_agent: bool,
    show_more: Option<i64>,
    badge_svg: &'static str,
}

#[derive(Template)]
#[template(path = "no_reviews.html")]
struct NoReviewsTemplate {
    class_no_results: String,
}

fn card(index: usize, review: &StoredReview, attrs: &ShortcodeAttrs, now: DateTime<Utc>) -> ReviewCard {
    let record = &review.record;
    let shown = i64::try_from(index).map_or(false, |i| i < attrs.shown_reviews);
    let stars = if record.rating > 0.0 { record.rating.trunc() as usize } else { 0 };
    ReviewCard {
        id: review.id,
        agent_id: record.agent_id.clone(),
        visibility: if shown {
            "rcreviews--shown-review"
        } else {
            "rcreviews--hidden-review d-none"
        },
        stars_html: STAR_SVG.trim().repeat(stars),
        rating: format!("{:.1}", record.rating),
        title: record.title.clone(),
        age: human_time_diff(record.created_date, now),
        content: record.content.clone(),
        agent_name: record.agent_name.clone(),
    }
}

pub fn render(attrs: &ShortcodeAttrs, result: &ReviewQueryResult, now: DateTime<Utc>) -> askama::Result<String> {
    if result.reviews.is_empty() {
        return NoReviewsTemplate {
            class_no_results: attrs.class(&attrs.class_no_results),
        }
        .render();
    }
    ReviewsTemplate {
        classes: Classes::from_attrs(attrs),
        listing_type: attrs.listing_type.clone(),
        cards: result
            .reviews
            .iter()
            .enumerate()
            .map(|(i, review)| card(i, review, attrs, now))
            .collect(),
        show_agent: attrs.is_agency_listing(),
        show_more: attrs.remaining(result.found),
        badge_svg: BADGE_SVG.trim(),
    }
    .render()
}

fn plural(n: i64, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

/// Coarse elapsed time between two instants, e.g. `3 days` or `1 month`.
pub fn human_time_diff(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 365 * DAY;

    let diff = (to - from).num_seconds().abs();
    let round = |unit: i64| ((diff as f64) / unit as f64).round().max(1.0) as i64;
    if diff < MINUTE {
        plural(diff.max(1), "second", "seconds")
    } else if diff < HOUR {
        plural(round(MINUTE), "min", "mins")
    } else if diff < DAY {
        plural(round(HOUR), "hour", "hours")
    } else if diff < WEEK {
        plural(round(DAY), "day", "days")
    } else if diff < MONTH {
        plural(round(WEEK), "week", "weeks")
    } else if diff < YEAR {
        plural(round(MONTH), "month", "months")
    } else {
        plural(round(YEAR), "year", "years")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rcreviews_core::ReviewRecord;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().unwrap()
    }

    fn stored(id: i64, rating: f64, agent: &str) -> StoredReview {
        StoredReview {
            id,
            post_type: "rcreviews".into(),
            record: ReviewRecord {
                unique_id: format!("1-{id}-0"),
                title: "Seller of house".into(),
                rating,
                reviewer_role: "Seller".into(),
                reviewer_name: "Jo".into(),
                created_date: now() - Duration::days(3),
                content: "Sold <fast>".into(),
                agent_id: id.to_string(),
                agent_name: agent.into(),
                listing_id: "1".into(),
            },
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn time_diff_buckets() {
        let t = now();
        assert_eq!(human_time_diff(t - Duration::seconds(20), t), "20 seconds");
        assert_eq!(human_time_diff(t - Duration::seconds(61), t), "1 min");
        assert_eq!(human_time_diff(t - Duration::minutes(45), t), "45 mins");
        assert_eq!(human_time_diff(t - Duration::hours(1), t), "1 hour");
        assert_eq!(human_time_diff(t - Duration::hours(5), t), "5 hours");
        assert_eq!(human_time_diff(t - Duration::days(1), t), "1 day");
        assert_eq!(human_time_diff(t - Duration::days(10), t), "1 week");
        assert_eq!(human_time_diff(t - Duration::days(20), t), "3 weeks");
        assert_eq!(human_time_diff(t - Duration::days(70), t), "2 months");
        assert_eq!(human_time_diff(t - Duration::days(800), t), "2 years");
    }

    #[test]
    fn button_count_prefers_max_reviews() {
        let mut attrs = ShortcodeAttrs {
            max_reviews: 10,
            shown_reviews: 3,
            ..Default::default()
        };
        assert_eq!(attrs.remaining(4), Some(7));
        attrs.max_reviews = 2;
        assert_eq!(attrs.remaining(40), None);
        attrs.max_reviews = -1;
        assert_eq!(attrs.remaining(5), Some(2));
        assert_eq!(attrs.remaining(3), None);
    }

    #[test]
    fn query_uses_limit_only_when_positive() {
        let attrs = ShortcodeAttrs {
            agent_id: "1, 2,".into(),
            min_stars: 4.0,
            ..Default::default()
        };
        let q = attrs.to_query();
        assert_eq!(q.agent_ids, vec!["1", "2"]);
        assert!(q.agent_names.is_empty());
        assert_eq!(q.limit, None);
        assert_eq!(q.min_rating, Some(4.0));
        let limited = ShortcodeAttrs {
            max_reviews: 5,
            ..Default::default()
        };
        assert_eq!(limited.to_query().limit, Some(5));
    }

    #[test]
    fn renders_visibility_stars_and_escaped_content() {
        let attrs = ShortcodeAttrs {
            shown_reviews: 1,
            ..Default::default()
        };
        let result = ReviewQueryResult {
            reviews: vec![stored(1, 5.0, "Kim"), stored(2, 4.5, "Lee")],
            found: 2,
        };
        let html = render(&attrs, &result, now()).unwrap();
        assert_eq!(html.matches("rcreviews--shown-review").count(), 1);
        assert_eq!(html.matches("rcreviews--hidden-review d-none").count(), 1);
        assert_eq!(html.matches("class=\"rcreviews--star\"").count(), 9);
        assert!(html.contains(">4.5<"));
        assert!(html.contains("3 days ago"));
        assert!(html.contains("Verified review"));
        assert!(html.contains("Sold &lt;fast&gt;"));
        assert!(html.contains("rcreviews--container container"));
        assert!(html.contains("<span class=\"rcreviews--count\">1</span>"));
        assert!(!html.contains("rcreviews--agent-name"));
    }

    #[test]
    fn unstyled_view_drops_custom_classes() {
        let attrs = ShortcodeAttrs {
            view: "unstyled".into(),
            listing_type: "agency".into(),
            ..Default::default()
        };
        let result = ReviewQueryResult {
            reviews: vec![stored(1, 5.0, "Kim")],
            found: 1,
        };
        let html = render(&attrs, &result, now()).unwrap();
        assert!(html.contains("class=\"rcreviews--container\""));
        assert!(!html.contains("bg-light"));
        assert!(html.contains("rcreviews--listing-type-agency"));
        assert!(html.contains("<span class=\"rcreviews--agent-name\">Kim</span>"));
        assert!(!html.contains("rcreviews--btn"));
    }

    #[test]
    fn empty_result_renders_no_results() {
        let attrs = ShortcodeAttrs {
            class_no_results: "text-muted".into(),
            ..Default::default()
        };
        let html = render(&attrs, &ReviewQueryResult::default(), now()).unwrap();
        assert!(html.contains("rcreviews--no-results text-muted"));
        assert!(html.contains("No reviews found."));
    }
}
