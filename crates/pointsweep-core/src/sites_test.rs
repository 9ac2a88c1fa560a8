use std::path::Path;

use super::*;

fn parse(yaml: &str) -> SitesFile {
    serde_yaml::from_str(yaml).unwrap()
}

const MINIMAL_SITE: &str = r"
sites:
  - name: moppy
    base_url: https://pc.moppy.jp
    detail_url_pattern: 'site_id=(?P<id>\d+)'
    link_selector: 'a'
    item_selector: 'li'
    pagination:
      kind: query_param
      param: page
    categories:
      - id: shopping
        name: Shopping
        url: https://pc.moppy.jp/category/list.php?child_category=52
";

#[test]
fn minimal_site_gets_defaults() {
    let file = parse(MINIMAL_SITE);
    let site = &file.sites[0];
    assert_eq!(site.default_platform, Platform::Web);
    assert_eq!(site.category_delay_ms, 0);
    assert!(site.title_selectors.is_empty());
    assert!(site.detail.is_none());
    assert!(!site.categories[0].apps);
    validate_sites(&file).unwrap();
}

#[test]
fn pagination_is_tagged_by_kind() {
    let callback: PaginationMechanism =
        serde_yaml::from_str("kind: callback\nscript: \"tab_select('tab1', 0, 63, {page})\"\n")
            .unwrap();
    assert_eq!(
        callback,
        PaginationMechanism::Callback {
            script: "tab_select('tab1', 0, 63, {page})".to_string(),
            settle_ms: 2500,
        }
    );

    let scroll: PaginationMechanism = serde_yaml::from_str("kind: infinite_scroll\n").unwrap();
    assert!(matches!(
        scroll,
        PaginationMechanism::InfiniteScroll { ref script, settle_ms: 2500 } if script.contains("scrollTo")
    ));
}

#[test]
fn unknown_pagination_kind_fails_to_parse() {
    let result: Result<PaginationMechanism, _> = serde_yaml::from_str("kind: carousel\n");
    assert!(result.is_err());
}

#[test]
fn page_cap_takes_the_tighter_limit() {
    let mut file = parse(MINIMAL_SITE);
    let site = &mut file.sites[0];
    assert_eq!(site.page_cap(50), 50);
    site.max_pages = Some(10);
    assert_eq!(site.page_cap(50), 10);
    site.max_pages = Some(80);
    assert_eq!(site.page_cap(50), 50);
}

#[test]
fn request_delay_falls_back_to_global() {
    let mut file = parse(MINIMAL_SITE);
    let site = &mut file.sites[0];
    assert_eq!(site.request_delay_ms(2000), 2000);
    site.min_request_delay_ms = Some(3000);
    assert_eq!(site.request_delay_ms(2000), 3000);
}

#[test]
fn validate_rejects_empty_name() {
    let mut file = parse(MINIMAL_SITE);
    file.sites[0].name = "  ".to_string();
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("non-empty"));
}

#[test]
fn validate_rejects_duplicate_site_names_case_insensitively() {
    let mut file = parse(MINIMAL_SITE);
    let mut twin = file.sites[0].clone();
    twin.name = "Moppy".to_string();
    file.sites.push(twin);
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("duplicate site name"));
}

#[test]
fn validate_rejects_pattern_without_id_group() {
    let mut file = parse(MINIMAL_SITE);
    file.sites[0].detail_url_pattern = r"site_id=(\d+)".to_string();
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("named 'id' group"));
}

#[test]
fn validate_rejects_unparseable_pattern() {
    let mut file = parse(MINIMAL_SITE);
    file.sites[0].detail_url_pattern = "site_id=(?P<id>".to_string();
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("invalid detail_url_pattern"));
}

#[test]
fn validate_rejects_non_positive_points_per_yen() {
    let mut file = parse(MINIMAL_SITE);
    file.sites[0].points_per_yen = Some(0.0);
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("points_per_yen"));
}

#[test]
fn validate_rejects_empty_categories() {
    let mut file = parse(MINIMAL_SITE);
    file.sites[0].categories.clear();
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("no categories"));
}

#[test]
fn validate_rejects_duplicate_category_ids() {
    let mut file = parse(MINIMAL_SITE);
    let twin = file.sites[0].categories[0].clone();
    file.sites[0].categories.push(twin);
    let err = validate_sites(&file).unwrap_err();
    assert!(err.to_string().contains("duplicate category id"));
}

#[test]
fn load_sites_reports_missing_file() {
    let err = load_sites(Path::new("/nonexistent/sites.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::SitesFileIo { .. }));
}

#[test]
fn load_sites_from_real_file() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("config")
        .join("sites.yaml");
    let file = load_sites(&path).unwrap();
    assert!(file.site("moppy").is_some());
    let pointincome = file.site("pointincome").unwrap();
    assert!(matches!(
        pointincome.pagination,
        PaginationMechanism::Callback { .. }
    ));
    assert!(pointincome.category("285").is_some_and(|c| c.apps));
}
