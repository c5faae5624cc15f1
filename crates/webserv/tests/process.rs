mod utils;

use std::{fs, time::Duration};

use anyhow::Error;
use devutils::Site;
use tracing_test::traced_test;
use webserv::{processor::SiteProcessor, session::SessionStore};
use webserv_config::{CgiMapping, Method, Redirect};

use crate::utils::{given_location, given_server, when_processed, when_processed_from};

#[test]
#[traced_test]
fn index_is_served_for_root() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("index.html", "<h1>home</h1>")?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")?;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.headers["Content-Type"], "text/html");
    assert_eq!(reply.headers["Content-Length"], "13");
    assert_eq!(reply.text(), "<h1>home</h1>");
    assert!(reply.session_id().is_some());
    assert!(logs_contain("handled request"));

    Ok(())
}

#[test]
fn static_files_get_their_mime_type() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("css/site.css", "body {}")?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /css/site.css HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.headers["Content-Type"], "text/css");

    Ok(())
}

#[test]
fn missing_file_uses_custom_error_page() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("errors/404.html", "<p>lost</p>")?;
    let mut server = given_server(&site);
    server
        .error_pages
        .insert(404, "/errors/404.html".to_string());
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /nope.html HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.status, 404);
    assert_eq!(reply.reason, "Not Found");
    assert_eq!(reply.text(), "<p>lost</p>");

    Ok(())
}

#[test]
fn unreadable_error_page_falls_back_to_builtin() -> Result<(), Error> {
    let site = Site::new()?;
    let mut server = given_server(&site);
    server.error_pages.insert(404, "missing.html".to_string());
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /nope.html HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.text(), "<html><body>404 Not Found</body></html>");

    Ok(())
}

#[test]
fn disallowed_methods_are_rejected() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("index.html", "home")?;
    let mut server = given_server(&site);
    server.locations[0].allowed_methods = Some(vec![Method::Get]);
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"DELETE /index.html HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 405);

    let reply = when_processed(&server, &mut sessions, b"PUT /index.html HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 405);

    assert!(site.join("index.html").exists());

    Ok(())
}

#[test]
fn oversized_body_is_rejected() -> Result<(), Error> {
    let site = Site::new()?;
    let mut server = given_server(&site);
    server.locations[0].client_max_body_size = 4;
    let mut sessions = SessionStore::default();

    let reply = when_processed(
        &server,
        &mut sessions,
        b"POST /form HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789",
    )?;

    assert_eq!(reply.status, 413);
    assert_eq!(reply.reason, "Payload Too Large");

    Ok(())
}

#[test]
fn redirect_location() -> Result<(), Error> {
    let site = Site::new()?;
    let mut server = given_server(&site);
    given_location(&mut server, "/old").redirect = Some(Redirect {
        code: 301,
        target: "/new".to_string(),
    });
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /old/page HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.status, 301);
    assert_eq!(reply.reason, "Moved Permanently");
    assert_eq!(reply.headers["Location"], "/new");

    Ok(())
}

#[test]
fn directory_listing_needs_autoindex() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("files/report.txt", "data")?;
    let mut server = given_server(&site);
    given_location(&mut server, "/files").root = Some(format!("{}files", site.root()));
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /files/ HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 403);

    server.locations[1].autoindex = true;
    let reply = when_processed(&server, &mut sessions, b"GET /files/ HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.status, 200);
    assert!(reply.text().contains("Index of"));
    assert!(reply.text().contains("<a href=\"report.txt\">report.txt</a> &nbsp; 4 bytes"));

    Ok(())
}

#[test]
fn multipart_upload_is_stored() -> Result<(), Error> {
    let site = Site::new()?;
    let store = site.create_dir("store")?;
    let mut server = given_server(&site);
    let location = given_location(&mut server, "/upload");
    location.upload_enable = true;
    location.upload_store = Some(store.clone());
    let mut sessions = SessionStore::default();

    let body = "--XYZ\r\n\
                Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
                Content-Type: text/plain\r\n\r\n\
                hello\r\n\
                --XYZ--\r\n";
    let raw = format!(
        "POST /upload/ HTTP/1.1\r\n\
         Content-Type: multipart/form-data; boundary=XYZ\r\n\
         Content-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );

    let first = when_processed(&server, &mut sessions, raw.as_bytes())?;
    let second = when_processed(&server, &mut sessions, raw.as_bytes())?;

    assert_eq!(first.status, 201);
    assert_eq!(second.status, 201);
    assert_eq!(fs::read(store.join("notes.txt"))?, b"hello");
    assert_eq!(fs::read(store.join("notes_1.txt"))?, b"hello");

    Ok(())
}

#[test]
fn upload_without_store_is_bad_request() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let reply = when_processed(
        &server,
        &mut sessions,
        b"POST /data.txt HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc",
    )?;

    assert_eq!(reply.status, 400);
    assert!(!site.join("data.txt").exists());

    Ok(())
}

#[test]
fn delete_removes_file_once() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("doomed.txt", "bye")?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"DELETE /doomed.txt HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 204);
    assert!(reply.body.is_empty());
    assert!(!site.join("doomed.txt").exists());

    let reply = when_processed(&server, &mut sessions, b"DELETE /doomed.txt HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 404);

    Ok(())
}

#[test]
fn parent_segments_are_forbidden() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("secret.txt", "hidden")?;
    let mut server = given_server(&site);
    server.locations[0].root = Some(format!("{}public/", site.root()));
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /../secret.txt HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 403);

    let reply = when_processed(&server, &mut sessions, b"GET /%2e%2e/secret.txt HTTP/1.1\r\n\r\n")?;
    assert_eq!(reply.status, 403);

    Ok(())
}

#[test]
fn malformed_request_is_bad_request() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GARBAGE\r\n\r\n")?;

    assert_eq!(reply.status, 400);
    assert!(reply.cookies.is_empty());
    assert!(sessions.is_empty());

    Ok(())
}

#[test]
fn session_is_reused_and_reports_activity() -> Result<(), Error> {
    let site = Site::new()?;
    site.write_file("index.html", "home")?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let first = when_processed(&server, &mut sessions, b"GET / HTTP/1.1\r\n\r\n")?;
    let id = first.session_id().expect("session cookie issued");
    assert!(first.cookies[0].ends_with("; Path=/; Max-Age=3600; HttpOnly"));

    let request = format!("GET /index.html HTTP/1.1\r\nCookie: WEBSERV_SESSION={}\r\n\r\n", id);
    let second = when_processed(&server, &mut sessions, request.as_bytes())?;
    assert!(second.cookies.is_empty());

    let request = format!(
        "GET /api/session-stats HTTP/1.1\r\nCookie: theme=dark; WEBSERV_SESSION={}\r\n\r\n",
        id
    );
    let stats = when_processed(&server, &mut sessions, request.as_bytes())?;

    assert_eq!(stats.status, 200);
    assert_eq!(stats.headers["Content-Type"], "application/json");
    let report: serde_json::Value = serde_json::from_slice(&stats.body)?;
    assert_eq!(report["page_views"], 3);
    assert_eq!(report["upload_count"], 0);
    assert_eq!(report["last_page_name"], "session-stats");
    assert_eq!(report["last_upload"], "never");
    assert_eq!(sessions.len(), 1);

    Ok(())
}

#[test]
#[traced_test]
fn session_from_another_client_is_replaced() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_server(&site);
    let mut sessions = SessionStore::default();

    let first = when_processed_from(&server, &mut sessions, "10.0.0.1", b"GET / HTTP/1.1\r\n\r\n")?;
    let id = first.session_id().expect("session cookie issued");

    let request = format!("GET / HTTP/1.1\r\nCookie: WEBSERV_SESSION={}\r\n\r\n", id);
    let second = when_processed_from(&server, &mut sessions, "10.0.0.2", request.as_bytes())?;

    let replacement = second.session_id().expect("replacement cookie issued");
    assert_ne!(replacement, id);
    assert!(second
        .cookies
        .iter()
        .any(|cookie| cookie == "WEBSERV_SESSION=; Path=/; Max-Age=0"));
    assert!(sessions.get(&id).is_none());
    assert!(sessions.get(&replacement).is_some());
    assert!(logs_contain("different client"));

    Ok(())
}

#[test]
fn expired_session_is_replaced() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_server(&site);
    let mut sessions = SessionStore::new(Duration::from_millis(20));

    let first = when_processed(&server, &mut sessions, b"GET / HTTP/1.1\r\n\r\n")?;
    let id = first.session_id().expect("session cookie issued");
    assert!(first.cookies[0].contains("Max-Age=1;"));
    std::thread::sleep(Duration::from_millis(50));

    let request = format!("GET / HTTP/1.1\r\nCookie: WEBSERV_SESSION={}\r\n\r\n", id);
    let second = when_processed(&server, &mut sessions, request.as_bytes())?;

    let replacement = second.session_id().expect("replacement cookie issued");
    assert_ne!(replacement, id);
    assert_eq!(sessions.len(), 1);

    Ok(())
}

fn given_cgi_server(site: &Site) -> Result<webserv_config::ServerConfig, Error> {
    site.write_script(
        "cgi-bin/hello.sh",
        r#"printf 'Content-Type: text/plain\r\n\r\n%s|%s|%s' "$REQUEST_METHOD" "$QUERY_STRING" "$PATH_INFO""#,
    )?;
    site.write_script("cgi-bin/slow.sh", "sleep 5")?;

    let mut server = given_server(site);
    let location = given_location(&mut server, "/cgi-bin");
    location.root = Some(format!("{}cgi-bin", site.root()));
    location.cgi = Some(CgiMapping {
        extension: ".sh".to_string(),
        interpreter: "/bin/sh".into(),
    });

    Ok(server)
}

#[test]
fn cgi_script_output_is_returned() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_cgi_server(&site)?;
    let mut sessions = SessionStore::default();

    let reply = when_processed(
        &server,
        &mut sessions,
        b"GET /cgi-bin/hello.sh/extra/path?name=x HTTP/1.1\r\n\r\n",
    )?;

    assert_eq!(reply.status, 200);
    assert_eq!(reply.headers["Content-Type"], "text/plain");
    assert_eq!(reply.text(), "GET|name=x|/extra/path");

    let id = reply.session_id().expect("session cookie issued");
    let report = sessions.get(&id).expect("session exists").report();
    assert_eq!(report.cgi_count, 1);
    assert_eq!(report.last_cgi_script, "hello.sh");

    Ok(())
}

#[test]
fn cgi_rejects_delete() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_cgi_server(&site)?;
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"DELETE /cgi-bin/hello.sh HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.status, 405);
    assert!(site.join("cgi-bin/hello.sh").exists());

    Ok(())
}

#[test]
fn missing_cgi_script_is_server_error() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_cgi_server(&site)?;
    let mut sessions = SessionStore::default();

    let reply = when_processed(&server, &mut sessions, b"GET /cgi-bin/absent.sh HTTP/1.1\r\n\r\n")?;

    assert_eq!(reply.status, 500);

    Ok(())
}

#[test]
fn slow_cgi_script_times_out() -> Result<(), Error> {
    let site = Site::new()?;
    let server = given_cgi_server(&site)?;
    let mut sessions = SessionStore::default();
    let processor = SiteProcessor::new(Duration::from_millis(300));

    let response = processor.handle(
        b"GET /cgi-bin/slow.sh HTTP/1.1\r\n\r\n",
        &server,
        "127.0.0.1",
        &mut sessions,
    );

    assert_eq!(response.status(), 504);

    Ok(())
}
