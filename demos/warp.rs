use warp::Filter;

use bytes::Buf;
use futures::stream::TryStreamExt;
use futures::Stream;
use mime::Mime;
use mpart_form::{FormConfig, FormParser, FormValue, Spool};
use std::convert::Infallible;

#[tokio::main]
async fn main() {
    // Decode any form posted to the server and describe it back
    let routes = warp::any()
        .and(warp::header::<Mime>("content-type"))
        .and(warp::body::stream())
        .and_then(form);

    warp::serve(routes).run(([127, 0, 0, 1], 3030)).await;
}

async fn form(
    mime: Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
) -> Result<impl warp::Reply, Infallible> {
    let config = FormConfig::new()
        .max_file_size(10 * 1024 * 1024)
        .spool(Spool::Above(64 * 1024));

    let Some(mut parser) = FormParser::for_content_type(mime.as_ref(), config) else {
        return Ok(format!("Not a form: {mime}\n"));
    };

    let stream = body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining()));

    let form = match parser.parse_stream(stream).await {
        Ok(form) => form,
        Err(err) => return Ok(format!("Could not read form ({:?}): {err}\n", err.kind())),
    };

    let mut reply = String::new();

    for (name, values) in form.iter() {
        for value in values {
            match value {
                FormValue::Text(text) => {
                    println!("Field received:{name}");
                    reply.push_str(&format!("{name} = {}\n", text.value()));
                }
                FormValue::File(file) => {
                    println!("Field filename:{}", file.file_name());
                    reply.push_str(&format!(
                        "{name} = {} ({}, {} bytes)\n",
                        file.file_name(),
                        file.content_type(),
                        file.item().size()
                    ));
                }
            }
        }
    }

    // uploads are not kept, dropping the parser deletes them
    Ok(reply)
}
