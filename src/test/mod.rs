//! Shared fixtures for unit tests.
//!
//! Each fixture models a small application as a [`MemoryIndex`]; the instruction listings in
//! the comments read like the disassembly they stand for.

use crate::index::{FieldRef, Instruction, InvokeKind, MemoryIndex, MethodBody, MethodRef};

fn sig(signature: &str) -> MethodRef {
    MethodRef::parse(signature).unwrap()
}

/// `C.c()` calls `B.b()` calls `A.a()`.
pub fn call_chain() -> MemoryIndex {
    MemoryIndex::builder()
        .call("Lcom/app/C;->c()V", "Lcom/app/B;->b()V")
        .call("Lcom/app/B;->b()V", "Lcom/app/A;->a()V")
        .build()
        .unwrap()
}

/// [`call_chain`] closed into a cycle by `A.a()` calling `C.c()`.
pub fn call_cycle() -> MemoryIndex {
    MemoryIndex::builder()
        .call("Lcom/app/C;->c()V", "Lcom/app/B;->b()V")
        .call("Lcom/app/B;->b()V", "Lcom/app/A;->a()V")
        .call("Lcom/app/A;->a()V", "Lcom/app/C;->c()V")
        .build()
        .unwrap()
}

/// An activity starting a background task, with call edges only.
///
/// - `Main.onCreate` sends over `Net`, loads an URL string and executes `Sync`
/// - `Sync.doInBackground` uploads over `Net`
/// - `Main.onClick` also sends over `Net`
pub fn android_app() -> MemoryIndex {
    let on_create = "Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V";
    MemoryIndex::builder()
        .class("Lcom/app/Main;", Some("Landroid/app/Activity;"))
        .class("Lcom/app/Sync;", Some("Landroid/os/AsyncTask;"))
        .class("Lcom/app/Net;", None)
        .call(on_create, "Lcom/app/Net;->send(Ljava/lang/String;)V")
        .call(on_create, "Lcom/app/Sync;-><init>()V")
        .call(
            on_create,
            "Lcom/app/Sync;->execute([Ljava/lang/Object;)Landroid/os/AsyncTask;",
        )
        .string(on_create, "https://example.com/api")
        .call(
            "Lcom/app/Sync;->doInBackground([Ljava/lang/Object;)Ljava/lang/Object;",
            "Lcom/app/Net;->upload([B)V",
        )
        .call(
            "Lcom/app/Main;->onClick(Landroid/view/View;)V",
            "Lcom/app/Net;->send(Ljava/lang/String;)V",
        )
        .build()
        .unwrap()
}

/// A secret flowing through registers, a helper call, a field and a parameter.
///
/// ```text
/// Main.onCreate(Bundle)          registers 5, ins 2
///   0 invoke-static {} Source.secret()
///   1 move-result-object v0
///   2 move-object v1, v0
///   3 iput-object v1, v3, Main.token
///   4 invoke-static {v1} Util.wrap(String)
///   5 move-result-object v2
///   6 invoke-virtual {v3, v2} Main.leak(String)
///   7 const-string v1, "x"
///   8 invoke-static {v1} Log.d(String)
///
/// Main.leak(String)              registers 3, ins 2
///   0 invoke-static {v2} Net.send(String)
///
/// Worker.run()                   registers 3, ins 1
///   0 iget-object v0, v2, Main.token
///   1 invoke-static {v0} Net.upload(String)
/// ```
pub fn data_flow_app() -> MemoryIndex {
    let token = FieldRef::new("Lcom/app/Main;", "token", "Ljava/lang/String;");

    let on_create = MethodBody::new(5, 2)
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[],
            sig("Lcom/app/Source;->secret()Ljava/lang/String;"),
        ))
        .with(Instruction::move_result(0))
        .with(Instruction::mov(1, 0))
        .with(Instruction::iput(1, 3, token.clone()))
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[1],
            sig("Lcom/app/Util;->wrap(Ljava/lang/String;)Ljava/lang/String;"),
        ))
        .with(Instruction::move_result(2))
        .with(Instruction::invoke(
            InvokeKind::Virtual,
            &[3, 2],
            sig("Lcom/app/Main;->leak(Ljava/lang/String;)V"),
        ))
        .with(Instruction::const_string(1, "x"))
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[1],
            sig("Lcom/app/Log;->d(Ljava/lang/String;)V"),
        ))
        .with(Instruction::return_void());

    let leak = MethodBody::new(3, 2)
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[2],
            sig("Lcom/app/Net;->send(Ljava/lang/String;)V"),
        ))
        .with(Instruction::return_void());

    let run = MethodBody::new(3, 1)
        .with(Instruction::iget(0, 2, token))
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[0],
            sig("Lcom/app/Net;->upload(Ljava/lang/String;)V"),
        ))
        .with(Instruction::return_void());

    MemoryIndex::builder()
        .class("Lcom/app/Main;", Some("Landroid/app/Activity;"))
        .method_body("Lcom/app/Main;->onCreate(Landroid/os/Bundle;)V", on_create)
        .method_body("Lcom/app/Main;->leak(Ljava/lang/String;)V", leak)
        .method_body("Lcom/app/Worker;->run()V", run)
        .build()
        .unwrap()
}

/// A web view exposing a script bridge, then loading a secret URL.
///
/// ```text
/// Main.show()                    registers 4, ins 1
///   0 new-instance v0, Browser
///   1 invoke-direct {v0} Browser.<init>()
///   2 new-instance v1, Bridge
///   3 invoke-direct {v1} Bridge.<init>()
///   4 const-string v2, "app"
///   5 invoke-virtual {v0, v1, v2} Browser.addJavascriptInterface(Object, String)
///   6 invoke-static {} Source.secret()
///   7 move-result-object v2
///   8 invoke-virtual {v0, v2} Browser.loadUrl(String)
///
/// @JavascriptInterface
/// Bridge.post(String)            registers 2, ins 2
///   0 invoke-static {v1} Net.send(String)
/// ```
pub fn webview_app() -> MemoryIndex {
    let show = MethodBody::new(4, 1)
        .with(Instruction::new_instance(0, "Lcom/app/Browser;"))
        .with(Instruction::invoke(
            InvokeKind::Direct,
            &[0],
            sig("Lcom/app/Browser;-><init>()V"),
        ))
        .with(Instruction::new_instance(1, "Lcom/app/Bridge;"))
        .with(Instruction::invoke(
            InvokeKind::Direct,
            &[1],
            sig("Lcom/app/Bridge;-><init>()V"),
        ))
        .with(Instruction::const_string(2, "app"))
        .with(Instruction::invoke(
            InvokeKind::Virtual,
            &[0, 1, 2],
            sig("Lcom/app/Browser;->addJavascriptInterface(Ljava/lang/Object;Ljava/lang/String;)V"),
        ))
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[],
            sig("Lcom/app/Source;->secret()Ljava/lang/String;"),
        ))
        .with(Instruction::move_result(2))
        .with(Instruction::invoke(
            InvokeKind::Virtual,
            &[0, 2],
            sig("Lcom/app/Browser;->loadUrl(Ljava/lang/String;)V"),
        ))
        .with(Instruction::return_void());

    let post = MethodBody::new(2, 2)
        .with(Instruction::invoke(
            InvokeKind::Static,
            &[1],
            sig("Lcom/app/Net;->send(Ljava/lang/String;)V"),
        ))
        .with(Instruction::return_void());

    MemoryIndex::builder()
        .class("Lcom/app/Browser;", Some("Landroid/webkit/WebView;"))
        .class("Lcom/app/Main;", Some("Landroid/app/Activity;"))
        .method_body("Lcom/app/Main;->show()V", show)
        .method_body("Lcom/app/Bridge;->post(Ljava/lang/String;)V", post)
        .annotate(
            "Lcom/app/Bridge;->post(Ljava/lang/String;)V",
            "Landroid/webkit/JavascriptInterface;",
        )
        .build()
        .unwrap()
}
