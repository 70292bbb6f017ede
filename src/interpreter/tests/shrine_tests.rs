//! Tests for service dispatch: activation, route binding, request handling

use super::helpers::{run_main, unit, unit_with_params};
use crate::interpreter::errors::RuntimeError;

#[test]
fn first_activation_binds_and_registers_routes() {
    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Get "/hello" To Answer "hi".
            Route Post "/echo" To Answer REQUEST_BODY.
        EndShrine.
        "#,
    )]);
    result.unwrap();
    assert!(interp.shrine().is_bound());
    assert!(interp.shrine().local_addr().is_some());
    assert_eq!(
        interp.shrine().routes(),
        vec!["GET /hello".to_string(), "POST /echo".to_string()]
    );
}

#[test]
fn duplicate_routes_are_rejected() {
    let (_, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Get "/x" To Answer "one".
            Route Get "/x" To Answer "two".
        EndShrine.
        "#,
    )]);
    assert_eq!(
        result,
        Err(RuntimeError::DuplicateRoute {
            key: "GET /x".to_string()
        })
    );
}

#[test]
fn same_path_different_method_is_allowed() {
    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Get "/x" To Answer "read".
            Route Post "/x" To Answer "write".
        EndShrine.
        "#,
    )]);
    result.unwrap();
    assert_eq!(interp.shrine().routes().len(), 2);
}

#[test]
fn a_second_address_is_rejected() {
    let (_, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Get "/a" To Answer "a".
        EndShrine.
        Shrine At "127.0.0.1:1":
            Route Get "/b" To Answer "b".
        EndShrine.
        "#,
    )]);
    assert!(matches!(result, Err(RuntimeError::AddrConflict { .. })));
}

#[test]
fn later_activations_at_the_same_address_add_routes() {
    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Get "/a" To Answer "a".
        EndShrine.
        Shrine At ":0":
            Route Get "/b" To Answer "b".
        EndShrine.
        "#,
    )]);
    result.unwrap();
    assert_eq!(interp.shrine().routes().len(), 2);
}

#[test]
fn sealed_shrine_rejects_unauthorized_route_changes() {
    let (_, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0" Using "key":
            Route Get "/a" To Answer "a".
        EndShrine.
        Shrine At ":0":
            Route Get "/b" To Answer "b".
        EndShrine.
        "#,
    )]);
    assert_eq!(result, Err(RuntimeError::SealedShrine));

    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0" Using "key":
            Route Get "/a" To Answer "a".
        EndShrine.
        Shrine At ":0" Using "key":
            Route Get "/b" To Answer "b".
        EndShrine.
        "#,
    )]);
    result.unwrap();
    assert_eq!(interp.shrine().routes().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn inline_routes_serve_query_derived_bindings() {
    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Let greeting Be "Hello ".
        Shrine At ":0":
            Route Get "/hello" To Answer greeting + Q_NAME.
        EndShrine.
        "#,
    )]);
    result.unwrap();

    let addr = interp.shrine().local_addr().unwrap();
    let response = reqwest::get(format!("http://127.0.0.1:{}/hello?name=Ada", addr.port()))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "Hello Ada\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn unit_routes_answer_and_shape_the_response() {
    let (interp, result, _) = run_main(vec![
        unit(
            "MAIN",
            r#"
            Shrine At ":0":
                Route Get "/plain" To Rite PLAIN.
                Route Get "/shaped" To Rite SHAPED.
                Route Get "/quiet" To Rite QUIET.
                Route Post "/echo" To Rite ECHOER.
            EndShrine.
            "#,
        ),
        unit("PLAIN", r#"Answer With "from rite"."#),
        unit(
            "SHAPED",
            r#"
            Let response_status Be "201".
            Let response_content_type Be "application/json".
            Let response_header_x_engine Be "rite".
            Answer With "{}".
            "#,
        ),
        unit("QUIET", r#"Let side Be "effect"."#),
        unit_with_params("ECHOER", &["unused"], r#"Answer With REQUEST_BODY."#),
    ]);
    result.unwrap();

    let addr = interp.shrine().local_addr().unwrap();
    let base = format!("http://127.0.0.1:{}", addr.port());

    let plain = reqwest::get(format!("{base}/plain")).await.unwrap();
    assert_eq!(plain.status(), 200);
    assert_eq!(plain.text().await.unwrap(), "from rite\n");

    let shaped = reqwest::get(format!("{base}/shaped")).await.unwrap();
    assert_eq!(shaped.status(), 201);
    assert_eq!(shaped.headers()["content-type"], "application/json");
    assert_eq!(shaped.headers()["x-engine"], "rite");
    assert_eq!(shaped.text().await.unwrap(), "{}\n");

    // Empty handler output defaults to OK.
    let quiet = reqwest::get(format!("{base}/quiet")).await.unwrap();
    assert_eq!(quiet.text().await.unwrap(), "OK\n");

    let echoed = reqwest::Client::new()
        .post(format!("{base}/echo"))
        .body("ping")
        .send()
        .await
        .unwrap();
    assert_eq!(echoed.text().await.unwrap(), "ping\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_paths_and_methods_are_rejected() {
    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Post "/only-post" To Answer "ok".
        EndShrine.
        "#,
    )]);
    result.unwrap();

    let addr = interp.shrine().local_addr().unwrap();
    let base = format!("http://127.0.0.1:{}", addr.port());

    let missing = reqwest::get(format!("{base}/missing")).await.unwrap();
    assert_eq!(missing.status(), 404);

    let wrong_method = reqwest::get(format!("{base}/only-post")).await.unwrap();
    assert_eq!(wrong_method.status(), 405);
}

#[tokio::test(flavor = "multi_thread")]
async fn json_path_suffix_selects_json_content_type() {
    let (interp, result, _) = run_main(vec![unit(
        "MAIN",
        r#"
        Shrine At ":0":
            Route Get "/data.json" To Answer "{}".
        EndShrine.
        "#,
    )]);
    result.unwrap();

    let addr = interp.shrine().local_addr().unwrap();
    let response = reqwest::get(format!("http://127.0.0.1:{}/data.json", addr.port()))
        .await
        .unwrap();
    assert_eq!(
        response.headers()["content-type"],
        "application/json; charset=utf-8"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn veiled_values_redact_on_the_response_path() {
    let (interp, result, _) = run_main(vec![
        unit(
            "MAIN",
            r#"
            Shrine At ":0":
                Route Get "/leaky" To Rite LEAKY.
            EndShrine.
            "#,
        ),
        unit(
            "LEAKY",
            r#"
            Let Veiled secret Be "doom".
            Answer With "value: " + secret.
            "#,
        ),
    ]);
    result.unwrap();

    let addr = interp.shrine().local_addr().unwrap();
    let response = reqwest::get(format!("http://127.0.0.1:{}/leaky", addr.port()))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "[VEILED]\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_failures_become_server_errors() {
    let (interp, result, _) = run_main(vec![
        unit(
            "MAIN",
            r#"
            Shrine At ":0":
                Route Get "/doomed" To Rite DOOMED.
            EndShrine.
            "#,
        ),
        unit("DOOMED", r#"Raise Curse "boom"."#),
    ]);
    result.unwrap();

    let addr = interp.shrine().local_addr().unwrap();
    let response = reqwest::get(format!("http://127.0.0.1:{}/doomed", addr.port()))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[test]
fn chorus_branches_share_the_shrine_singleton() {
    // Spec scenario: with branches [A, B, C] where B fails, A's and C's side
    // effects both occur and the reported error is B's. Route registration is
    // the observable cross-branch side effect.
    let (interp, result, _) = run_main(vec![
        unit(
            "MAIN",
            r#"
            Shrine At ":0":
                Route Get "/boot" To Answer "up".
            EndShrine.
            Chorus:
                Invoke Rite DECLARE_A.
                Invoke Rite FAILING.
                Invoke Rite DECLARE_C.
            EndChorus.
            "#,
        ),
        unit(
            "DECLARE_A",
            r#"
            Shrine At ":0":
                Route Get "/a" To Answer "a".
            EndShrine.
            "#,
        ),
        unit("FAILING", r#"Raise Curse "boom"."#),
        unit(
            "DECLARE_C",
            r#"
            Shrine At ":0":
                Route Get "/c" To Answer "c".
            EndShrine.
            "#,
        ),
    ]);

    assert_eq!(
        result,
        Err(RuntimeError::Curse {
            name: "boom".to_string()
        })
    );
    let routes = interp.shrine().routes();
    assert!(routes.contains(&"GET /a".to_string()));
    assert!(routes.contains(&"GET /c".to_string()));
    assert!(routes.contains(&"GET /boot".to_string()));
}
