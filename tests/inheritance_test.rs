use moody::{Loader, MemorySource, params};
use std::sync::Once;

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    });
}

fn loader() -> Loader {
    init_logger();
    Loader::builder()
        .source(
            MemorySource::new()
                .template("parent.txt", "Hello {% block name %}world{% endblock %}")
                .template(
                    "child.txt",
                    "{% extends 'parent.txt' %}{% block name %}Dave {% block surname %}Hall{% endblock %}{% endblock %}",
                )
                .template(
                    "grandchild.txt",
                    "{% extends 'child.txt' %}{% block surname %}Foo{% endblock surname %}",
                ),
        )
        .build()
}

#[test]
fn test_three_level_chain() {
    let loader = loader();
    assert_eq!(loader.render("parent.txt", &()).unwrap(), "Hello world");
    assert_eq!(loader.render("child.txt", &()).unwrap(), "Hello Dave Hall");
    assert_eq!(loader.render("grandchild.txt", &()).unwrap(), "Hello Dave Foo");
}

#[test]
fn test_super_walks_the_override_chain() {
    let loader = Loader::builder()
        .source(
            MemorySource::new()
                .template("base.txt", "[{% block a %}base{% endblock %}]")
                .template(
                    "mid.txt",
                    "{% extends 'base.txt' %}{% block a %}mid>{% super %}{% endblock %}",
                )
                .template(
                    "leaf.txt",
                    "{% extends 'mid.txt' %}{% block a %}leaf>{% super %}{% endblock %}",
                ),
        )
        .build();
    assert_eq!(loader.render("leaf.txt", &()).unwrap(), "[leaf>mid>base]");
    assert_eq!(loader.render("mid.txt", &()).unwrap(), "[mid>base]");
}

#[test]
fn test_multiple_blocks_per_level() {
    let loader = Loader::builder()
        .source(
            MemorySource::new()
                .template(
                    "base.txt",
                    "{% block head %}H{% endblock %}|{% block body %}B{% endblock %}|{% block foot %}F{% endblock %}",
                )
                .template(
                    "page.txt",
                    "{% extends 'base.txt' %}{% block body %}body{% endblock %}{% block foot %}foot{% endblock %}",
                )
                .template(
                    "special.txt",
                    "{% extends 'page.txt' %}{% block head %}head{% endblock %}",
                ),
        )
        .build();
    assert_eq!(loader.render("special.txt", &()).unwrap(), "head|body|foot");
}

#[test]
fn test_blocks_see_parameters() {
    let loader = Loader::builder()
        .source(
            MemorySource::new()
                .template("base.txt", "{% block greet %}Hi{% endblock %} {{ name }}")
                .template(
                    "child.txt",
                    "{% extends 'base.txt' %}{% block greet %}Hello{% endblock %}",
                ),
        )
        .build();
    assert_eq!(
        loader.render("child.txt", &params! { "name" => "Dave" }).unwrap(),
        "Hello Dave"
    );
}

#[test]
fn test_extends_expression_and_missing_parent() {
    let loader = Loader::builder()
        .source(
            MemorySource::new()
                .template("a.txt", "A:{% block x %}{% endblock %}")
                .template("b.txt", "B:{% block x %}{% endblock %}")
                .template("pick.txt", "{% extends layout %}{% block x %}1{% endblock %}"),
        )
        .build();
    assert_eq!(
        loader.render("pick.txt", &params! { "layout" => "a.txt" }).unwrap(),
        "A:1"
    );
    assert_eq!(
        loader.render("pick.txt", &params! { "layout" => "b.txt" }).unwrap(),
        "B:1"
    );

    let err = loader
        .render("pick.txt", &params! { "layout" => "nope.txt" })
        .unwrap_err();
    assert!(err.is_render());
    assert_eq!(err.location(), Some(("pick.txt", 1)));
    assert!(err.to_string().contains("\"nope.txt\""));
}

#[test]
fn test_extends_cycle_is_bounded() {
    let loader = Loader::builder()
        .source(MemorySource::new().template("self.txt", "{% extends 'self.txt' %}"))
        .build();
    let err = loader.render("self.txt", &()).unwrap_err();
    assert!(err.is_render());
    assert!(err.to_string().contains("maximum template nesting depth exceeded"));
}

#[test]
fn test_extends_must_be_first() {
    let loader = Loader::builder()
        .source(MemorySource::new().template("late.txt", "x{% extends 'a.txt' %}"))
        .build();
    let err = loader.load("late.txt").unwrap_err();
    assert!(err.is_compile());
    assert_eq!(err.location(), Some(("late.txt", 1)));
}

#[test]
fn test_duplicate_block_in_child() {
    let loader = Loader::builder()
        .source(MemorySource::new().template(
            "dup.txt",
            "{% extends 'a.txt' %}{% block x %}{% endblock %}\n{% block x %}{% endblock %}",
        ))
        .build();
    let err = loader.load("dup.txt").unwrap_err();
    assert!(err.is_compile());
    assert_eq!(err.location(), Some(("dup.txt", 2)));
}
